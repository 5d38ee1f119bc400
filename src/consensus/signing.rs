//! Operator signing surface.
//!
//! Default implementation hashes `"{operator}:{task}:{value:.2}"` with
//! SHA-256. Production deployments substitute BLS with identical
//! sign/verify semantics.

use sha2::{Digest, Sha256};

/// Sign a scalar on behalf of an operator for a task.
pub fn sign(operator_id: &str, task_id: &str, value: f64) -> Vec<u8> {
    let data = format!("{}:{}:{:.2}", operator_id, task_id, value);
    Sha256::digest(data.as_bytes()).to_vec()
}

/// Verify a signature produced by [`sign`]. Symmetric by construction.
pub fn verify(signature: &[u8], operator_id: &str, task_id: &str, value: f64) -> bool {
    sign(operator_id, task_id, value) == signature
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let sig = sign("op1", "task-1", 22.5);
        assert!(verify(&sig, "op1", "task-1", 22.5));
    }

    #[test]
    fn test_verify_rejects_wrong_operator() {
        let sig = sign("op1", "task-1", 22.5);
        assert!(!verify(&sig, "op2", "task-1", 22.5));
    }

    #[test]
    fn test_verify_rejects_wrong_value() {
        let sig = sign("op1", "task-1", 22.5);
        assert!(!verify(&sig, "op1", "task-1", 22.51));
        assert!(!verify(&sig, "op1", "task-2", 22.5));
    }

    #[test]
    fn test_value_rounding_is_part_of_the_message() {
        // Two values that agree to two decimals sign identically.
        assert_eq!(sign("op1", "t", 22.504), sign("op1", "t", 22.496));
    }
}
