//! C FFI Bindings for Mobile Hosts
//!
//! This module exposes the alarm engine to native apps via C ABI. The host
//! owns the clock: every call that needs the time takes a monotonic
//! `now_ms`. Platform output (GPS control, sound, vibration, notification,
//! keep-alive) is delegated back to the host through [`GeoWakeCallbacks`].
//!
//! Memory Safety:
//! - All returned strings must be freed with `geowake_free_string()`
//! - The engine instance must be freed with `geowake_engine_destroy()`
//! - NULL checks are performed on all inputs
//!
//! Thread Safety:
//! - The engine is NOT thread-safe. Call it from a single thread or behind a mutex.
//! - Callbacks are invoked synchronously on the calling thread.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use tokio::sync::mpsc;

use crate::alarm::{AlarmEngine, Collaborators};
use crate::challenge::DismissProof;
use crate::config::EngineConfig;
use crate::effector::{Effector, EventSink, KeepAlive, PositionSource, Subscription};
use crate::error::{EffectorError, EngineError, PositionError};
use crate::runtime::EngineEvent;
use crate::sampler::Cadence;
use crate::types::{
    AlarmConfig, AlarmState, Destination, DismissDifficulty, MotionSample, PositionFix, SoundProfile,
    VibrationProfile,
};

// ============================================================================
// OPAQUE HANDLE TYPES
// ============================================================================

/// Opaque handle to a GeoWake engine.
pub struct GeoWakeEngine {
    engine: AlarmEngine,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

/// Result status codes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoWakeStatus {
    /// Operation succeeded.
    Ok = 0,
    /// Null pointer provided.
    NullPointer = 1,
    /// Invalid parameter value (destination, config, string encoding).
    InvalidParameter = 2,
    /// Operation not allowed in the current alarm state.
    InvalidState = 3,
    /// Dismissal proof rejected; alarm is still ringing.
    ChallengeFailed = 4,
    /// Alarm settings can only change while idle.
    ConfigLocked = 5,
    /// Internal error.
    InternalError = 6,
}

impl From<&EngineError> for GeoWakeStatus {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::InvalidDestination(_) | EngineError::InvalidConfig(_) | EngineError::Config(_) => {
                GeoWakeStatus::InvalidParameter
            }
            EngineError::InvalidTransition { .. } => GeoWakeStatus::InvalidState,
            EngineError::ChallengeFailed => GeoWakeStatus::ChallengeFailed,
            EngineError::ConfigLocked(_) => GeoWakeStatus::ConfigLocked,
            _ => GeoWakeStatus::InternalError,
        }
    }
}

fn status_of(result: crate::error::Result<()>) -> GeoWakeStatus {
    match result {
        Ok(()) => GeoWakeStatus::Ok,
        Err(e) => GeoWakeStatus::from(&e),
    }
}

/// Host callback table. Any entry may be NULL; a missing output callback
/// is reported as unsupported and logged, never fatal.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GeoWakeCallbacks {
    /// Passed back as the first argument of every callback.
    pub user_data: *mut c_void,
    pub start_position: Option<extern "C" fn(*mut c_void) -> i32>,
    pub stop_position: Option<extern "C" fn(*mut c_void)>,
    pub request_fix: Option<extern "C" fn(*mut c_void)>,
    /// Interval in ms, 0 for continuous.
    pub set_cadence: Option<extern "C" fn(*mut c_void, u64)>,
    pub start_keep_alive: Option<extern "C" fn(*mut c_void) -> i32>,
    pub stop_keep_alive: Option<extern "C" fn(*mut c_void)>,
    pub acquire: Option<extern "C" fn(*mut c_void) -> i32>,
    pub release: Option<extern "C" fn(*mut c_void)>,
    /// Profile (0=Soft, 1=Loud, 2=Gentle) and initial volume.
    pub start_sound: Option<extern "C" fn(*mut c_void, i32, f32) -> i32>,
    pub stop_sound: Option<extern "C" fn(*mut c_void)>,
    pub escalate: Option<extern "C" fn(*mut c_void, u32) -> i32>,
    /// Pattern in ms (vibrate, pause, vibrate, ...) and its length.
    pub vibrate: Option<extern "C" fn(*mut c_void, *const u32, usize) -> i32>,
    pub stop_vibration: Option<extern "C" fn(*mut c_void)>,
    pub show_notification: Option<extern "C" fn(*mut c_void, *const c_char, *const c_char) -> i32>,
}

impl GeoWakeCallbacks {
    /// Table with every callback unset.
    pub const fn empty() -> Self {
        Self {
            user_data: ptr::null_mut(),
            start_position: None,
            stop_position: None,
            request_fix: None,
            set_cadence: None,
            start_keep_alive: None,
            stop_keep_alive: None,
            acquire: None,
            release: None,
            start_sound: None,
            stop_sound: None,
            escalate: None,
            vibrate: None,
            stop_vibration: None,
            show_notification: None,
        }
    }
}

/// Alarm parameters for `geowake_arm()`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GeoWakeAlarm {
    pub dest_lat: f64,
    pub dest_lon: f64,
    pub radius_m: f64,
    /// Optional null-terminated label, may be NULL.
    pub name: *const c_char,
    /// 0 disables smart wake.
    pub wake_minutes_before: f64,
    /// 0=Easy, 1=Medium, 2=Hard, 3=Shake.
    pub dismiss_difficulty: i32,
    /// 0=Soft, 1=Loud, 2=Gentle.
    pub sound_profile: i32,
    /// 0=Gentle, 1=Normal, 2=Intense, 3=Escalating.
    pub vibration_profile: i32,
    pub escalation_seconds: u32,
    pub sound_enabled: i32,
    pub vibration_enabled: i32,
    pub initial_volume: f32,
}

// The host promises single-threaded use (see module docs).
#[derive(Clone, Copy)]
struct HostCallbacks(GeoWakeCallbacks);

unsafe impl Send for HostCallbacks {}

impl HostCallbacks {
    fn status(code: i32, what: &str) -> Result<(), EffectorError> {
        if code == 0 {
            Ok(())
        } else {
            Err(EffectorError::Failed(format!("{} returned {}", what, code)))
        }
    }

    fn unsupported(what: &str) -> EffectorError {
        EffectorError::Unsupported(what.to_string())
    }
}

struct CallbackPositionSource(HostCallbacks);

impl PositionSource for CallbackPositionSource {
    fn start(&mut self, _sink: EventSink) -> Result<Subscription, PositionError> {
        let cb = self.0 .0;
        match cb.start_position {
            Some(f) => match f(cb.user_data) {
                0 => Ok(Subscription::new()),
                1 => Err(PositionError::PermissionDenied),
                3 => Err(PositionError::Timeout),
                _ => Err(PositionError::Unavailable),
            },
            None => Err(PositionError::Unavailable),
        }
    }

    fn stop(&mut self) {
        let cb = self.0 .0;
        if let Some(f) = cb.stop_position {
            f(cb.user_data);
        }
    }

    fn request_fix(&mut self) {
        let cb = self.0 .0;
        if let Some(f) = cb.request_fix {
            f(cb.user_data);
        }
    }

    fn set_cadence(&mut self, cadence: Cadence) {
        let cb = self.0 .0;
        if let Some(f) = cb.set_cadence {
            let interval = match cadence {
                Cadence::Continuous => 0,
                Cadence::Interval(ms) => ms,
            };
            f(cb.user_data, interval);
        }
    }
}

struct CallbackKeepAlive(HostCallbacks);

impl KeepAlive for CallbackKeepAlive {
    fn start(&mut self, _sink: EventSink) -> Result<Subscription, EffectorError> {
        let cb = self.0 .0;
        let f = cb.start_keep_alive.ok_or_else(|| HostCallbacks::unsupported("keep-alive"))?;
        HostCallbacks::status(f(cb.user_data), "start_keep_alive")?;
        Ok(Subscription::new())
    }

    fn stop(&mut self) {
        let cb = self.0 .0;
        if let Some(f) = cb.stop_keep_alive {
            f(cb.user_data);
        }
    }
}

struct CallbackEffector(HostCallbacks);

impl Effector for CallbackEffector {
    fn acquire(&mut self) -> Result<(), EffectorError> {
        let cb = self.0 .0;
        match cb.acquire {
            Some(f) => HostCallbacks::status(f(cb.user_data), "acquire"),
            None => Ok(()),
        }
    }

    fn release(&mut self) {
        let cb = self.0 .0;
        if let Some(f) = cb.release {
            f(cb.user_data);
        }
    }

    fn start_sound(&mut self, profile: SoundProfile, initial_volume: f32) -> Result<(), EffectorError> {
        let cb = self.0 .0;
        let f = cb.start_sound.ok_or_else(|| HostCallbacks::unsupported("sound"))?;
        let code = match profile {
            SoundProfile::Soft => 0,
            SoundProfile::Loud => 1,
            SoundProfile::Gentle => 2,
        };
        HostCallbacks::status(f(cb.user_data, code, initial_volume), "start_sound")
    }

    fn stop_sound(&mut self) {
        let cb = self.0 .0;
        if let Some(f) = cb.stop_sound {
            f(cb.user_data);
        }
    }

    fn escalate(&mut self, duration_s: u32) -> Result<(), EffectorError> {
        let cb = self.0 .0;
        let f = cb.escalate.ok_or_else(|| HostCallbacks::unsupported("escalation"))?;
        HostCallbacks::status(f(cb.user_data, duration_s), "escalate")
    }

    fn vibrate(&mut self, pattern_ms: &[u32]) -> Result<(), EffectorError> {
        let cb = self.0 .0;
        let f = cb.vibrate.ok_or_else(|| HostCallbacks::unsupported("vibration"))?;
        HostCallbacks::status(f(cb.user_data, pattern_ms.as_ptr(), pattern_ms.len()), "vibrate")
    }

    fn stop_vibration(&mut self) {
        let cb = self.0 .0;
        if let Some(f) = cb.stop_vibration {
            f(cb.user_data);
        }
    }

    fn show_notification(&mut self, title: &str, body: &str) -> Result<(), EffectorError> {
        let cb = self.0 .0;
        let f = cb
            .show_notification
            .ok_or_else(|| HostCallbacks::unsupported("notification"))?;
        let title = CString::new(title).map_err(|e| EffectorError::Failed(e.to_string()))?;
        let body = CString::new(body).map_err(|e| EffectorError::Failed(e.to_string()))?;
        HostCallbacks::status(f(cb.user_data, title.as_ptr(), body.as_ptr()), "show_notification")
    }
}

fn difficulty_from(code: i32) -> Option<DismissDifficulty> {
    match code {
        0 => Some(DismissDifficulty::Easy),
        1 => Some(DismissDifficulty::Medium),
        2 => Some(DismissDifficulty::Hard),
        3 => Some(DismissDifficulty::Shake),
        _ => None,
    }
}

fn sound_from(code: i32) -> Option<SoundProfile> {
    match code {
        0 => Some(SoundProfile::Soft),
        1 => Some(SoundProfile::Loud),
        2 => Some(SoundProfile::Gentle),
        _ => None,
    }
}

fn vibration_from(code: i32) -> Option<VibrationProfile> {
    match code {
        0 => Some(VibrationProfile::Gentle),
        1 => Some(VibrationProfile::Normal),
        2 => Some(VibrationProfile::Intense),
        3 => Some(VibrationProfile::Escalating),
        _ => None,
    }
}

fn state_code(state: AlarmState) -> i32 {
    match state {
        AlarmState::Idle => 0,
        AlarmState::Armed => 1,
        AlarmState::Triggered => 2,
        AlarmState::Snoozed => 3,
        AlarmState::Dismissed => 4,
    }
}

/// Read an optional C string. NULL is `Ok(None)`; invalid UTF-8 is an error.
unsafe fn opt_str(p: *const c_char) -> Result<Option<String>, GeoWakeStatus> {
    if p.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(p)
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|_| GeoWakeStatus::InvalidParameter)
}

impl GeoWakeEngine {
    /// Apply events collaborators pushed into the sink.
    fn drain(&mut self, now_ms: u64) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                EngineEvent::Fix(fix) => {
                    self.engine.on_fix(fix);
                }
                EngineEvent::PositionFailed(e) => self.engine.on_position_error(e, now_ms),
                EngineEvent::Motion(sample) => {
                    self.engine.on_motion(sample);
                }
                EngineEvent::Heartbeat => {
                    self.engine.on_heartbeat(now_ms);
                }
                EngineEvent::Visibility(v) => self.engine.on_visibility(v, now_ms),
                EngineEvent::Battery { level, charging } => self.engine.update_battery(level, charging),
                // Commands only come from the async handle.
                EngineEvent::Command(_) => {}
            }
        }
    }
}

// ============================================================================
// ENGINE LIFECYCLE
// ============================================================================

/// Create a new GeoWake engine instance.
///
/// # Safety
/// - `callbacks` must be a valid pointer to GeoWakeCallbacks (copied).
/// - `config_toml` may be NULL (defaults) or a null-terminated TOML string.
/// - The returned pointer must be freed with `geowake_engine_destroy()`.
///
/// # Parameters
/// - `seed`: 0 for random challenges, anything else for a fixed sequence.
///
/// # Returns
/// - Pointer to GeoWakeEngine on success.
/// - NULL on failure (null callbacks, bad TOML).
#[no_mangle]
pub unsafe extern "C" fn geowake_engine_create(
    callbacks: *const GeoWakeCallbacks,
    config_toml: *const c_char,
    seed: u64,
) -> *mut GeoWakeEngine {
    if callbacks.is_null() {
        return ptr::null_mut();
    }
    let host = HostCallbacks(*callbacks);

    let config = match opt_str(config_toml) {
        Ok(None) => EngineConfig::default(),
        Ok(Some(text)) => match EngineConfig::from_toml_str(&text) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting engine config");
                return ptr::null_mut();
            }
        },
        Err(_) => return ptr::null_mut(),
    };

    let (sink, events) = EventSink::channel();
    let collaborators = Collaborators::new(
        CallbackPositionSource(host),
        CallbackEffector(host),
        CallbackKeepAlive(host),
    );
    let engine = if seed == 0 {
        AlarmEngine::new(config, sink, collaborators)
    } else {
        AlarmEngine::with_seed(config, sink, collaborators, seed)
    };

    Box::into_raw(Box::new(GeoWakeEngine { engine, events }))
}

/// Destroy a GeoWake engine instance. An active alarm is disarmed first.
///
/// # Safety
/// - `engine` must be a valid pointer from `geowake_engine_create()`.
/// - Must not be called more than once for the same pointer.
#[no_mangle]
pub unsafe extern "C" fn geowake_engine_destroy(engine: *mut GeoWakeEngine) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

/// Arm the alarm.
///
/// # Safety
/// - `engine` and `alarm` must be valid pointers.
#[no_mangle]
pub unsafe extern "C" fn geowake_arm(
    engine: *mut GeoWakeEngine,
    alarm: *const GeoWakeAlarm,
    now_ms: u64,
) -> GeoWakeStatus {
    if engine.is_null() || alarm.is_null() {
        return GeoWakeStatus::NullPointer;
    }
    let engine = &mut *engine;
    let alarm = &*alarm;

    let name = match opt_str(alarm.name) {
        Ok(name) => name,
        Err(status) => return status,
    };
    let (Some(dismiss_difficulty), Some(sound_profile), Some(vibration_profile)) = (
        difficulty_from(alarm.dismiss_difficulty),
        sound_from(alarm.sound_profile),
        vibration_from(alarm.vibration_profile),
    ) else {
        return GeoWakeStatus::InvalidParameter;
    };

    let config = AlarmConfig {
        radius_m: alarm.radius_m,
        wake_minutes_before: alarm.wake_minutes_before,
        dismiss_difficulty,
        sound_profile,
        vibration_profile,
        escalation_seconds: alarm.escalation_seconds,
        sound_enabled: alarm.sound_enabled != 0,
        vibration_enabled: alarm.vibration_enabled != 0,
        initial_volume: alarm.initial_volume,
    };
    let mut destination = Destination::from_config(alarm.dest_lat, alarm.dest_lon, &config);
    destination.name = name;

    status_of(engine.engine.arm(destination, config, now_ms))
}

/// Disarm from any state. Always succeeds on a valid engine.
#[no_mangle]
pub unsafe extern "C" fn geowake_disarm(engine: *mut GeoWakeEngine) -> GeoWakeStatus {
    if engine.is_null() {
        return GeoWakeStatus::NullPointer;
    }
    (*engine).engine.disarm();
    GeoWakeStatus::Ok
}

/// Snooze a ringing alarm. `minutes <= 0` uses the configured default.
#[no_mangle]
pub unsafe extern "C" fn geowake_snooze(engine: *mut GeoWakeEngine, minutes: f64, now_ms: u64) -> GeoWakeStatus {
    if engine.is_null() {
        return GeoWakeStatus::NullPointer;
    }
    let minutes = (minutes > 0.0).then_some(minutes);
    status_of((*engine).engine.snooze(minutes, now_ms))
}

/// Dismiss a ringing alarm.
///
/// # Safety
/// - `response` may be NULL or a null-terminated answer/phrase.
///
/// # Parameters
/// - `shake`: non-zero claims the shake challenge was completed.
#[no_mangle]
pub unsafe extern "C" fn geowake_dismiss(
    engine: *mut GeoWakeEngine,
    response: *const c_char,
    shake: i32,
) -> GeoWakeStatus {
    if engine.is_null() {
        return GeoWakeStatus::NullPointer;
    }
    let proof = if shake != 0 {
        DismissProof::Shake
    } else {
        match opt_str(response) {
            Ok(Some(text)) => DismissProof::Response(text),
            Ok(None) => DismissProof::Acknowledge,
            Err(status) => return status,
        }
    };
    status_of((*engine).engine.dismiss(&proof))
}

// ============================================================================
// INPUTS
// ============================================================================

/// Push a position fix.
///
/// # Parameters
/// - `heading_deg`, `speed_mps`: NaN (or negative speed) when unknown.
///
/// # Returns
/// - `InvalidParameter` for coordinates outside WGS84 ranges.
#[no_mangle]
pub unsafe extern "C" fn geowake_push_fix(
    engine: *mut GeoWakeEngine,
    lat: f64,
    lon: f64,
    accuracy_m: f64,
    heading_deg: f64,
    speed_mps: f64,
    timestamp_ms: u64,
) -> GeoWakeStatus {
    if engine.is_null() {
        return GeoWakeStatus::NullPointer;
    }
    let fix = PositionFix::new(lat, lon, timestamp_ms)
        .with_accuracy(accuracy_m)
        .with_heading(heading_deg)
        .with_speed(speed_mps);
    if !fix.is_valid() {
        return GeoWakeStatus::InvalidParameter;
    }
    (*engine).engine.on_fix(fix);
    GeoWakeStatus::Ok
}

/// Report a position source failure (1=PermissionDenied, 2=Unavailable, 3=Timeout).
#[no_mangle]
pub unsafe extern "C" fn geowake_position_error(engine: *mut GeoWakeEngine, code: i32, now_ms: u64) -> GeoWakeStatus {
    if engine.is_null() {
        return GeoWakeStatus::NullPointer;
    }
    let error = match code {
        1 => PositionError::PermissionDenied,
        2 => PositionError::Unavailable,
        3 => PositionError::Timeout,
        _ => return GeoWakeStatus::InvalidParameter,
    };
    (*engine).engine.on_position_error(error, now_ms);
    GeoWakeStatus::Ok
}

/// Keep-alive heartbeat tick (roughly every 10 s while armed).
#[no_mangle]
pub unsafe extern "C" fn geowake_heartbeat(engine: *mut GeoWakeEngine, now_ms: u64) -> GeoWakeStatus {
    if engine.is_null() {
        return GeoWakeStatus::NullPointer;
    }
    (*engine).engine.on_heartbeat(now_ms);
    GeoWakeStatus::Ok
}

/// App visibility change. Becoming visible re-syncs the position stream.
#[no_mangle]
pub unsafe extern "C" fn geowake_set_visible(engine: *mut GeoWakeEngine, visible: i32, now_ms: u64) -> GeoWakeStatus {
    if engine.is_null() {
        return GeoWakeStatus::NullPointer;
    }
    (*engine).engine.on_visibility(visible != 0, now_ms);
    GeoWakeStatus::Ok
}

/// Battery telemetry, `level` in [0, 1].
#[no_mangle]
pub unsafe extern "C" fn geowake_set_battery(engine: *mut GeoWakeEngine, level: f32, charging: i32) -> GeoWakeStatus {
    if engine.is_null() {
        return GeoWakeStatus::NullPointer;
    }
    if !level.is_finite() {
        return GeoWakeStatus::InvalidParameter;
    }
    (*engine).engine.update_battery(level, charging != 0);
    GeoWakeStatus::Ok
}

/// Accelerometer sample for the shake challenge.
///
/// # Returns
/// - 1 once enough shakes were counted, 0 otherwise, -1 on NULL engine.
#[no_mangle]
pub unsafe extern "C" fn geowake_push_motion(
    engine: *mut GeoWakeEngine,
    timestamp_ms: u64,
    accel_x: f32,
    accel_y: f32,
    accel_z: f32,
) -> i32 {
    if engine.is_null() {
        return -1;
    }
    let sample = MotionSample::new(timestamp_ms, [accel_x, accel_y, accel_z]);
    i32::from((*engine).engine.on_motion(sample))
}

/// Fire due timers (snooze, vibration pulses). Call at least once a second
/// while the alarm is active.
///
/// # Returns
/// - Number of timers fired, -1 on NULL engine.
#[no_mangle]
pub unsafe extern "C" fn geowake_tick(engine: *mut GeoWakeEngine, now_ms: u64) -> i32 {
    if engine.is_null() {
        return -1;
    }
    let engine = &mut *engine;
    engine.drain(now_ms);
    let mut fired = 0;
    while engine.engine.advance(now_ms).is_some() {
        fired += 1;
    }
    fired
}

// ============================================================================
// STATUS QUERIES
// ============================================================================

/// Current alarm state (0=Idle, 1=Armed, 2=Triggered, 3=Snoozed, 4=Dismissed).
#[no_mangle]
pub unsafe extern "C" fn geowake_state(engine: *const GeoWakeEngine) -> i32 {
    if engine.is_null() {
        return -1;
    }
    state_code((*engine).engine.state())
}

/// Full status snapshot as JSON.
///
/// # Returns
/// - JSON string (MUST be freed with `geowake_free_string()`).
/// - NULL on error.
#[no_mangle]
pub unsafe extern "C" fn geowake_status_json(engine: *const GeoWakeEngine, now_ms: u64) -> *mut c_char {
    if engine.is_null() {
        return ptr::null_mut();
    }
    let status = (*engine).engine.status(now_ms);
    let Ok(json) = serde_json::to_string(&status) else {
        return ptr::null_mut();
    };
    match CString::new(json) {
        Ok(cstring) => cstring.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Free a string returned by `geowake_status_json()`.
///
/// # Safety
/// - `ptr` must be a string returned by this library.
/// - Must not be called more than once for the same pointer.
#[no_mangle]
pub unsafe extern "C" fn geowake_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Get the library version string.
///
/// # Returns
/// - Static string, do NOT free.
#[no_mangle]
pub extern "C" fn geowake_version() -> *const c_char {
    static VERSION: &[u8] = concat!("geowake/", env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct HostLog {
        sounds: AtomicU32,
        sound_stops: AtomicU32,
        vibrations: AtomicU32,
        notifications: AtomicU32,
        position_starts: AtomicU32,
    }

    fn log(user: *mut c_void) -> &'static HostLog {
        unsafe { &*(user as *const HostLog) }
    }

    extern "C" fn start_position(user: *mut c_void) -> i32 {
        log(user).position_starts.fetch_add(1, Ordering::SeqCst);
        0
    }
    extern "C" fn start_sound(user: *mut c_void, _profile: i32, _volume: f32) -> i32 {
        log(user).sounds.fetch_add(1, Ordering::SeqCst);
        0
    }
    extern "C" fn stop_sound(user: *mut c_void) {
        log(user).sound_stops.fetch_add(1, Ordering::SeqCst);
    }
    extern "C" fn vibrate(user: *mut c_void, pattern: *const u32, len: usize) -> i32 {
        assert!(!pattern.is_null() && len > 0);
        log(user).vibrations.fetch_add(1, Ordering::SeqCst);
        0
    }
    extern "C" fn notify(user: *mut c_void, title: *const c_char, _body: *const c_char) -> i32 {
        let title = unsafe { CStr::from_ptr(title) }.to_str().unwrap();
        assert_eq!(title, "GeoWake");
        log(user).notifications.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn callbacks(host: &'static HostLog) -> GeoWakeCallbacks {
        GeoWakeCallbacks {
            user_data: host as *const HostLog as *mut c_void,
            start_position: Some(start_position),
            start_sound: Some(start_sound),
            stop_sound: Some(stop_sound),
            vibrate: Some(vibrate),
            show_notification: Some(notify),
            ..GeoWakeCallbacks::empty()
        }
    }

    fn alarm() -> GeoWakeAlarm {
        GeoWakeAlarm {
            dest_lat: 0.0,
            dest_lon: 0.0,
            radius_m: 500.0,
            name: ptr::null(),
            wake_minutes_before: 0.0,
            dismiss_difficulty: 0,
            sound_profile: 1,
            vibration_profile: 2,
            escalation_seconds: 0,
            sound_enabled: 1,
            vibration_enabled: 1,
            initial_volume: 0.3,
        }
    }

    #[test]
    fn test_engine_lifecycle() {
        let host: &'static HostLog = Box::leak(Box::default());
        unsafe {
            let cb = callbacks(host);
            let engine = geowake_engine_create(&cb, ptr::null(), 7);
            assert!(!engine.is_null());
            assert_eq!(geowake_state(engine), 0);

            let name = CString::new("Home").unwrap();
            let params = GeoWakeAlarm {
                name: name.as_ptr(),
                ..alarm()
            };
            assert_eq!(geowake_arm(engine, &params, 0), GeoWakeStatus::Ok);
            assert_eq!(geowake_state(engine), 1);
            assert_eq!(host.position_starts.load(Ordering::SeqCst), 1);

            // ~0.0045 degrees of latitude is roughly 500 m.
            assert_eq!(geowake_push_fix(engine, 0.01, 0.0, 5.0, f64::NAN, f64::NAN, 1_000), GeoWakeStatus::Ok);
            assert_eq!(geowake_state(engine), 1);
            assert_eq!(geowake_push_fix(engine, 0.001, 0.0, 5.0, f64::NAN, 10.0, 2_000), GeoWakeStatus::Ok);
            assert_eq!(geowake_state(engine), 2);
            assert_eq!(host.sounds.load(Ordering::SeqCst), 1);
            assert_eq!(host.notifications.load(Ordering::SeqCst), 1);

            let json = geowake_status_json(engine, 2_000);
            assert!(!json.is_null());
            let text = CStr::from_ptr(json).to_str().unwrap().to_string();
            geowake_free_string(json);
            assert!(text.contains("\"state\":\"triggered\""));
            assert!(text.contains("Home"));

            assert!(geowake_tick(engine, 60_000) >= 1);
            assert!(host.vibrations.load(Ordering::SeqCst) >= 2);

            assert_eq!(geowake_snooze(engine, 0.0, 60_000), GeoWakeStatus::Ok);
            assert_eq!(geowake_state(engine), 3);
            assert_eq!(geowake_tick(engine, 60_000 + 119_999), 0);
            assert_eq!(geowake_tick(engine, 60_000 + 120_000), 1);
            assert_eq!(geowake_state(engine), 2);
            assert_eq!(host.sounds.load(Ordering::SeqCst), 2);

            assert_eq!(geowake_dismiss(engine, ptr::null(), 0), GeoWakeStatus::Ok);
            assert_eq!(geowake_state(engine), 4);

            geowake_engine_destroy(engine);
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let host: &'static HostLog = Box::leak(Box::default());
        unsafe {
            let cb = callbacks(host);
            let engine = geowake_engine_create(&cb, ptr::null(), 1);

            let bad = GeoWakeAlarm {
                radius_m: 0.0,
                ..alarm()
            };
            assert_eq!(geowake_arm(engine, &bad, 0), GeoWakeStatus::InvalidParameter);
            let bad = GeoWakeAlarm {
                dismiss_difficulty: 9,
                ..alarm()
            };
            assert_eq!(geowake_arm(engine, &bad, 0), GeoWakeStatus::InvalidParameter);
            assert_eq!(geowake_state(engine), 0);

            assert_eq!(geowake_snooze(engine, 1.0, 0), GeoWakeStatus::InvalidState);
            assert_eq!(
                geowake_push_fix(engine, 91.0, 0.0, 0.0, f64::NAN, f64::NAN, 0),
                GeoWakeStatus::InvalidParameter
            );
            assert_eq!(geowake_position_error(engine, 42, 0), GeoWakeStatus::InvalidParameter);

            geowake_engine_destroy(engine);
        }
    }

    #[test]
    fn test_config_toml() {
        let host: &'static HostLog = Box::leak(Box::default());
        unsafe {
            let cb = callbacks(host);
            let good = CString::new("default_snooze_minutes = 1.0").unwrap();
            let engine = geowake_engine_create(&cb, good.as_ptr(), 1);
            assert!(!engine.is_null());
            geowake_engine_destroy(engine);

            let bad = CString::new("default_snooze_minutes = \"soon\"").unwrap();
            assert!(geowake_engine_create(&cb, bad.as_ptr(), 1).is_null());
        }
    }

    #[test]
    fn test_version() {
        let version = geowake_version();
        assert!(!version.is_null());

        unsafe {
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(version_str.starts_with("geowake/"));
        }
    }

    #[test]
    fn test_null_safety() {
        unsafe {
            assert!(geowake_engine_create(ptr::null(), ptr::null(), 0).is_null());
            assert_eq!(geowake_disarm(ptr::null_mut()), GeoWakeStatus::NullPointer);
            assert_eq!(geowake_arm(ptr::null_mut(), ptr::null(), 0), GeoWakeStatus::NullPointer);
            assert_eq!(
                geowake_push_fix(ptr::null_mut(), 0.0, 0.0, 0.0, 0.0, 0.0, 0),
                GeoWakeStatus::NullPointer
            );
            assert_eq!(geowake_state(ptr::null()), -1);
            assert_eq!(geowake_tick(ptr::null_mut(), 0), -1);
            assert_eq!(geowake_push_motion(ptr::null_mut(), 0, 0.0, 0.0, 0.0), -1);
            assert!(geowake_status_json(ptr::null(), 0).is_null());
            geowake_free_string(ptr::null_mut());
            geowake_engine_destroy(ptr::null_mut());
        }
    }
}
