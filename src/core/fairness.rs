//! Provably-Fair Crash-Point Derivation
//!
//! The one fairness primitive every game variant consumes. Pure functions,
//! no state, no I/O: given the revealed seeds any third party re-derives
//! the exact crash point the engine committed to before the round began.
//!
//! # Derivation
//!
//! ```text
//! digest = HMAC-SHA256(key = serverSeed, msg = clientSeed ":" nonce [tag])
//! h      = first 13 hex chars of digest, as u64        (h < 2^52)
//! r      = h / 2^52                                    (r in [0, 1))
//! raw    = (1 - houseEdge) / (1 - r)
//! crash  = clamp(floor(raw * 100), 1.00x, 5000.00x)    (hundredths)
//! ```
//!
//! The dual ("dragon") stream appends a domain-separation tag to the
//! message, so both streams share one commitment yet are statistically
//! independent.

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use super::units::Multiplier;

type HmacSha256 = Hmac<Sha256>;

/// Domain-separation tag for the dragon stream.
const DRAGON_TAG: &str = ":dragon";

/// Number of random bytes in a server seed (hex-encoded to 64 chars).
const SERVER_SEED_BYTES: usize = 32;

/// Which crash line a derivation (or a bet) targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    /// The primary crash line.
    #[default]
    Primary,
    /// The second, independently-derived crash line.
    Dragon,
}

impl Stream {
    /// Domain-separation suffix appended to the HMAC message.
    pub fn tag(self) -> &'static str {
        match self {
            Stream::Primary => "",
            Stream::Dragon => DRAGON_TAG,
        }
    }
}

/// Derive the crash point for one stream of one round.
///
/// Deterministic: identical inputs always produce the identical multiplier.
/// `house_edge` is a fraction in (0, 1), e.g. `0.04`.
pub fn derive_crash_point(
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
    house_edge: f64,
    stream: Stream,
) -> Multiplier {
    let message = format!("{}:{}{}", client_seed, nonce, stream.tag());

    let mut mac = HmacSha256::new_from_slice(server_seed.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(message.as_bytes());
    let digest = mac.finalize().into_bytes();

    // First 13 hex chars = the 52 most significant bits of the digest.
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let h = u64::from_be_bytes(prefix) >> 12;

    let r = h as f64 / (1u64 << 52) as f64;
    let raw = (1.0 - house_edge) / (1.0 - r);
    let hundredths = (raw * 100.0).floor() as u64;

    let clamped = hundredths
        .max(Multiplier::ONE.hundredths() as u64)
        .min(Multiplier::MAX.hundredths() as u64);
    Multiplier::from_hundredths(clamped as u32)
}

/// Generate a fresh server seed from OS entropy.
pub fn generate_server_seed() -> String {
    let mut bytes = [0u8; SERVER_SEED_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Commitment hash for a server seed, published at round start.
///
/// The hash is over the seed string's bytes, so verifiers need no decoding
/// convention beyond UTF-8.
pub fn seed_hash(server_seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(server_seed.as_bytes());
    hex::encode(hasher.finalize())
}

// =============================================================================
// TESTS
// =============================================================================
