//! Synapse tokens and handle-token minting.
//!
//! A synapse token is an opaque per-process identifier minted at process
//! creation and re-minted on privilege elevation. Every handle records the
//! token of its owning process, and every kernel operation that resolves a
//! handle presents the caller's current token; a mismatch is
//! `SYNAPSE_TOKEN_MISMATCH`. Tokens only need to be unforgeable by
//! in-process guest code of equal or lesser privilege.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use spinning_top::Spinlock;

use crate::host::Host;

/// Opaque per-process identity token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SynapseToken(String);

impl SynapseToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Shared mint for synapse and handle tokens.
///
/// Entropy mixes the host random source, the monotonic uptime at mint time,
/// and a process-local counter, giving well over the required 64 bits.
pub struct TokenMint {
    host: Arc<dyn Host>,
    rng: Spinlock<SmallRng>,
    counter: AtomicU64,
}

impl TokenMint {
    pub fn new(host: Arc<dyn Host>) -> TokenMint {
        let mut seed = [0u8; 32];
        host.random_bytes(&mut seed);
        // Fold the boot-time clock into the seed so two hosts with an
        // identical random source still diverge.
        let uptime_bits = host.uptime().to_bits().to_le_bytes();
        for (i, b) in uptime_bits.iter().enumerate() {
            seed[i] ^= b;
        }
        TokenMint {
            host,
            rng: Spinlock::new(SmallRng::from_seed(seed)),
            counter: AtomicU64::new(0),
        }
    }

    fn raw(&self, bytes: usize) -> String {
        let mut buf = vec![0u8; bytes];
        self.rng.lock().fill_bytes(&mut buf);

        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let clock = self.host.uptime().to_bits();

        let mut out = String::with_capacity(bytes * 2 + 16);
        for b in &buf {
            out.push_str(&format!("{b:02x}"));
        }
        out.push_str(&format!("{:08x}", (clock ^ counter) as u32));
        out
    }

    /// Mint a fresh synapse token (48 bytes of opaque text).
    pub fn synapse(&self) -> SynapseToken {
        SynapseToken(format!("syn-{}", self.raw(20)))
    }

    /// Mint a fresh handle token.
    pub fn handle(&self) -> String {
        format!("h-{}", self.raw(12))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtHost;

    #[test]
    fn synapse_tokens_are_distinct_and_sized() {
        let mint = TokenMint::new(VirtHost::builder().build());
        let a = mint.synapse();
        let b = mint.synapse();
        assert_ne!(a, b);
        let len = a.as_str().len();
        assert!((32..=64).contains(&len), "token length {len}");
    }

    #[test]
    fn handle_tokens_are_opaque_strings() {
        let mint = TokenMint::new(VirtHost::builder().build());
        let token = mint.handle();
        assert!(token.starts_with("h-"));
        assert!(token.len() >= 18);
        assert!(token[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn mint_survives_heavy_use_without_collisions() {
        let mint = TokenMint::new(VirtHost::builder().build());
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(mint.handle()));
        }
    }
}
