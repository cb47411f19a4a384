//! Dismissal challenges.
//!
//! A triggered alarm can require proof the traveler is actually awake
//! before it goes quiet: an arithmetic answer, a typed phrase, or a number
//! of vigorous shakes. A fresh challenge is issued on every trigger.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::{DismissDifficulty, MotionSample};

/// Phrases offered for the `Hard` challenge.
pub const PHRASES: [&str; 5] = [
    "I am awake now",
    "Time to get up",
    "Almost there",
    "Wake up now",
    "Stay alert",
];

/// Shake detection tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Summed per-axis acceleration delta (m/s²) that counts as one shake.
    pub shake_threshold: f32,
    /// Shakes needed to complete the challenge.
    pub shakes_required: u32,
    /// Minimum spacing between compared motion samples (ms).
    pub shake_min_interval_ms: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            shake_threshold: 25.0,
            shakes_required: 5,
            shake_min_interval_ms: 100,
        }
    }
}

/// The prompt a challenge UI should present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Challenge {
    Acknowledge,
    Arithmetic { question: String, answer: String },
    Phrase { phrase: String },
    Shake { required: u32 },
}

impl Challenge {
    /// Issue a challenge for the configured difficulty.
    pub fn issue<R: Rng + ?Sized>(difficulty: DismissDifficulty, config: &ChallengeConfig, rng: &mut R) -> Self {
        match difficulty {
            DismissDifficulty::Easy => Challenge::Acknowledge,
            DismissDifficulty::Medium => arithmetic(rng),
            DismissDifficulty::Hard => Challenge::Phrase {
                phrase: PHRASES[rng.gen_range(0..PHRASES.len())].to_string(),
            },
            DismissDifficulty::Shake => Challenge::Shake {
                required: config.shakes_required,
            },
        }
    }

    /// Text to show the user.
    pub fn prompt(&self) -> String {
        match self {
            Challenge::Acknowledge => "Tap to dismiss".to_string(),
            Challenge::Arithmetic { question, .. } => question.clone(),
            Challenge::Phrase { phrase } => format!("Type this phrase: \"{}\"", phrase),
            Challenge::Shake { required } => format!("Shake your phone {} times", required),
        }
    }

    /// Check a proof against this challenge. `shakes` is the count recorded
    /// during the current trigger session.
    pub fn verify(&self, proof: &DismissProof, shakes: u32) -> bool {
        match (self, proof) {
            (Challenge::Acknowledge, _) => true,
            (Challenge::Arithmetic { answer, .. }, DismissProof::Response(input)) => input.trim() == answer,
            (Challenge::Phrase { phrase }, DismissProof::Response(input)) => {
                input.trim().to_lowercase() == phrase.to_lowercase()
            }
            (Challenge::Shake { required }, DismissProof::Shake) => shakes >= *required,
            _ => false,
        }
    }
}

fn arithmetic<R: Rng + ?Sized>(rng: &mut R) -> Challenge {
    let (a, op, b, answer): (i32, char, i32, i32) = match rng.gen_range(0..3) {
        0 => {
            let (a, b) = (rng.gen_range(10..60), rng.gen_range(10..60));
            (a, '+', b, a + b)
        }
        1 => {
            let (a, b) = (rng.gen_range(30..80), rng.gen_range(1..31));
            (a, '-', b, a - b)
        }
        _ => {
            let (a, b) = (rng.gen_range(2..14), rng.gen_range(2..14));
            (a, '*', b, a * b)
        }
    };
    Challenge::Arithmetic {
        question: format!("{} {} {} = ?", a, op, b),
        answer: answer.to_string(),
    }
}

/// What the user offered to dismiss the alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DismissProof {
    /// Plain tap.
    Acknowledge,
    /// Typed answer or phrase.
    Response(String),
    /// Claim that the shake count has been reached.
    Shake,
}

/// Counts shakes from raw accelerometer samples.
#[derive(Debug, Clone)]
pub struct ShakeDetector {
    config: ChallengeConfig,
    last: Option<MotionSample>,
    count: u32,
}

impl ShakeDetector {
    pub fn new(config: ChallengeConfig) -> Self {
        Self {
            config,
            last: None,
            count: 0,
        }
    }

    /// Feed one sample; returns true if it registered a shake.
    ///
    /// Samples closer than the minimum interval to the last compared sample
    /// are ignored entirely.
    pub fn process_sample(&mut self, sample: &MotionSample) -> bool {
        let Some(prev) = self.last else {
            self.last = Some(*sample);
            return false;
        };
        if sample.timestamp_ms.saturating_sub(prev.timestamp_ms) <= self.config.shake_min_interval_ms {
            return false;
        }

        let delta: f32 = (0..3).map(|i| (sample.accel[i] - prev.accel[i]).abs()).sum();
        self.last = Some(*sample);
        if delta > self.config.shake_threshold {
            self.count += 1;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.count >= self.config.shakes_required
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }
}

impl Default for ShakeDetector {
    fn default() -> Self {
        Self::new(ChallengeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_easy_accepts_anything() {
        let mut rng = StdRng::seed_from_u64(1);
        let c = Challenge::issue(DismissDifficulty::Easy, &ChallengeConfig::default(), &mut rng);
        assert!(c.verify(&DismissProof::Acknowledge, 0));
        assert!(c.verify(&DismissProof::Response("whatever".into()), 0));
    }

    #[test]
    fn test_arithmetic_answers_are_correct() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let c = Challenge::issue(DismissDifficulty::Medium, &ChallengeConfig::default(), &mut rng);
            let Challenge::Arithmetic { question, answer } = &c else {
                panic!("expected arithmetic, got {:?}", c);
            };
            let parts: Vec<&str> = question.split_whitespace().collect();
            let a: i32 = parts[0].parse().unwrap();
            let b: i32 = parts[2].parse().unwrap();
            let expected = match parts[1] {
                "+" => a + b,
                "-" => a - b,
                "*" => a * b,
                op => panic!("unexpected operator {}", op),
            };
            assert_eq!(answer, &expected.to_string());
            assert!(expected >= 0);
            assert!(c.verify(&DismissProof::Response(format!(" {} ", expected)), 0));
            assert!(!c.verify(&DismissProof::Response((expected + 1).to_string()), 0));
            assert!(!c.verify(&DismissProof::Acknowledge, 0));
        }
    }

    #[test]
    fn test_phrase_case_insensitive() {
        let c = Challenge::Phrase {
            phrase: "Stay alert".into(),
        };
        assert!(c.verify(&DismissProof::Response("  stay ALERT ".into()), 0));
        assert!(!c.verify(&DismissProof::Response("stay awake".into()), 0));
    }

    #[test]
    fn test_issued_phrase_from_list() {
        let mut rng = StdRng::seed_from_u64(3);
        let c = Challenge::issue(DismissDifficulty::Hard, &ChallengeConfig::default(), &mut rng);
        match c {
            Challenge::Phrase { phrase } => assert!(PHRASES.contains(&phrase.as_str())),
            other => panic!("expected phrase, got {:?}", other),
        }
    }

    #[test]
    fn test_shake_challenge_verify() {
        let c = Challenge::Shake { required: 5 };
        assert!(!c.verify(&DismissProof::Shake, 4));
        assert!(c.verify(&DismissProof::Shake, 5));
        assert!(!c.verify(&DismissProof::Acknowledge, 10));
    }

    #[test]
    fn test_shake_detection() {
        let mut detector = ShakeDetector::default();
        let mut t = 0;
        let mut up = true;
        while !detector.is_complete() {
            t += 150;
            up = !up;
            let z = if up { 20.0 } else { -10.0 };
            detector.process_sample(&MotionSample::new(t, [0.0, 5.0, z]));
            assert!(t < 10_000, "shakes never completed");
        }
        assert_eq!(detector.count(), 5);
    }

    #[test]
    fn test_shake_ignores_fast_samples_and_gentle_motion() {
        let mut detector = ShakeDetector::default();
        detector.process_sample(&MotionSample::new(0, [0.0, 0.0, 9.8]));
        // Too soon after the reference sample.
        assert!(!detector.process_sample(&MotionSample::new(50, [30.0, 0.0, 9.8])));
        // Gentle movement.
        assert!(!detector.process_sample(&MotionSample::new(200, [1.0, 1.0, 9.0])));
        assert_eq!(detector.count(), 0);

        detector.reset();
        assert!(!detector.process_sample(&MotionSample::new(1000, [0.0, 0.0, 0.0])));
        assert!(detector.process_sample(&MotionSample::new(1200, [10.0, 10.0, 10.0])));
    }
}
