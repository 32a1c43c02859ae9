use anyhow::{Context, Result};
use bcrypt::{BcryptError, HashParts};
use rand::Rng;

use super::model::RedeemError;

/// Shortest secret that can be issued.
pub const MIN_SECRET_LEN: usize = 8;
/// Secrets are always shorter than this.
pub const MAX_SECRET_LEN: usize = 33;
/// bcrypt work factor used for every hash the service produces.
pub const BCRYPT_COST: u32 = 10;
/// Highest cost accepted in a caller-supplied hash. The candidate's cost sets
/// how much work verification does, so it is bounded.
pub const MAX_CANDIDATE_COST: u32 = 12;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generate a random ASCII-letter secret with a length drawn uniformly from
/// `MIN_SECRET_LEN..MAX_SECRET_LEN`.
pub fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    let len = rng.gen_range(MIN_SECRET_LEN..MAX_SECRET_LEN);
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Salted bcrypt hash of `plaintext` at the fixed work factor.
pub fn hash_secret(plaintext: &str) -> Result<String> {
    bcrypt::hash(plaintext, BCRYPT_COST).context("bcrypt hash")
}

/// Check a caller-supplied `candidate` hash against the issued `plaintext`.
///
/// The candidate must be a well-formed bcrypt string with a cost of at most
/// `MAX_CANDIDATE_COST`, otherwise the result is `RedeemError::MalformedInput`
/// and no hashing work is done.
pub fn verify_secret(plaintext: &str, candidate: &str) -> Result<bool, RedeemError> {
    let parts: HashParts = candidate.parse().map_err(malformed)?;
    if parts.get_cost() > MAX_CANDIDATE_COST {
        return Err(RedeemError::MalformedInput(format!(
            "cost {} exceeds {MAX_CANDIDATE_COST}",
            parts.get_cost()
        )));
    }
    bcrypt::verify(plaintext, candidate).map_err(malformed)
}

fn malformed(e: BcryptError) -> RedeemError {
    RedeemError::MalformedInput(e.to_string())
}
