//! Stable fingerprints for repeated-work detection
//!
//! Plans and validation inputs are hashed with SHA-256 so the analysis
//! workflow can recognise work it has already done.

use crate::models::{PlannedStep, StepId, StepResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use tracing::warn;
use uuid::Uuid;

/// Fingerprint of a goal and the set of queries planned for it.
///
/// Step order, case and surrounding whitespace do not matter.
pub fn plan_fingerprint(goal: &str, steps: &[PlannedStep]) -> String {
    let mut queries: Vec<String> = steps.iter().map(|s| normalize(&s.description)).collect();
    queries.sort();
    queries.dedup();

    hash_serialized(&(normalize(goal), queries))
}

/// Fingerprint of a draft together with the results it describes.
pub fn validation_fingerprint(draft: &str, results: &BTreeMap<StepId, StepResult>) -> String {
    hash_serialized(&(draft.trim(), results))
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 of the JSON encoding, streamed straight into the hasher.
///
/// A value that cannot be encoded gets a random fingerprint: it never matches
/// earlier work, so it can cost a cache hit but never cause a false stall.
fn hash_serialized<T: Serialize>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if let Err(e) = serde_json::to_writer(&mut HashWriter(&mut hasher), value) {
        warn!(error = %e, "Could not encode value for fingerprinting");
        return Uuid::new_v4().simple().to_string();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(descriptions: &[&str]) -> Vec<PlannedStep> {
        descriptions
            .iter()
            .enumerate()
            .map(|(i, d)| PlannedStep {
                step_id: StepId(i as u32 + 1),
                description: d.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_plan_fingerprint_ignores_order_and_spacing() {
        let a = plan_fingerprint(
            "Compare food spending",
            &steps(&["Food total current month", "Food total prior month"]),
        );
        let b = plan_fingerprint(
            "compare  food spending",
            &steps(&["food total prior month", "  Food total current month"]),
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not encodable"))
        }
    }

    #[test]
    fn test_unencodable_values_never_collide() {
        let a = hash_serialized(&Unencodable);
        let b = hash_serialized(&Unencodable);
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn test_plan_fingerprint_changes_with_queries() {
        let a = plan_fingerprint("goal", &steps(&["food total current month"]));
        let b = plan_fingerprint("goal", &steps(&["food total last 90 days"]));
        assert_ne!(a, b);
    }
}
