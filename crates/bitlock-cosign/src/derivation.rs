//! Custodian key derivation checks
//!
//! At lock creation the custodian commits to one non-hardened child of its
//! extended key: the parent fingerprint and the child index are recorded in
//! [`XpubSources`] and the child public key becomes `vault_pubkey`. Before
//! cosigning, the custodian re-derives that child and proves it matches.
//!
//! A mismatch is final. The verifier never tries another index.

use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, SecretKey, Signing, Verification};
use bitcoin::PublicKey;
use bitlock_core::XpubSources;
use std::fmt;

use crate::error::KeyMismatch;

/// A custodian signing key whose derivation has been checked against a lock.
///
/// Only [`verify_cosign_key`] produces one, so every cosign signature comes
/// from a verified key.
#[derive(Clone)]
pub struct CosignKey {
    secret: SecretKey,
    pubkey: PublicKey,
    sources: XpubSources,
}

impl CosignKey {
    pub fn pubkey(&self) -> &PublicKey {
        &self.pubkey
    }

    pub fn sources(&self) -> &XpubSources {
        &self.sources
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl fmt::Debug for CosignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosignKey")
            .field("pubkey", &self.pubkey)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

fn normal_child(index: u32) -> Result<ChildNumber, KeyMismatch> {
    ChildNumber::from_normal_idx(index).map_err(|_| KeyMismatch::HardenedIndex(index))
}

fn check_child(index: u32, derived: &PublicKey, recorded: &PublicKey) -> Result<(), KeyMismatch> {
    if derived.to_bytes() != recorded.to_bytes() {
        return Err(KeyMismatch::ChildKey {
            index,
            derived: derived.to_string(),
            recorded: recorded.to_string(),
        });
    }
    Ok(())
}

/// Check that `xpriv` is the custodian key `sources` commits to and derive the
/// signing key for `vault_pubkey`.
pub fn verify_cosign_key<C: Signing>(
    secp: &Secp256k1<C>,
    xpriv: &Xpriv,
    vault_pubkey: &PublicKey,
    sources: &XpubSources,
) -> Result<CosignKey, KeyMismatch> {
    let child = normal_child(sources.cosign_hd_index)?;

    let fingerprint = xpriv.fingerprint(secp);
    if fingerprint != sources.parent_fingerprint {
        return Err(KeyMismatch::Fingerprint {
            expected: sources.parent_fingerprint.to_string(),
            actual: fingerprint.to_string(),
        });
    }

    let derived = xpriv
        .derive_priv(secp, &[child])
        .map_err(|e| KeyMismatch::Derivation(e.to_string()))?;
    let pubkey = PublicKey::new(derived.private_key.public_key(secp));
    check_child(sources.cosign_hd_index, &pubkey, vault_pubkey)?;

    Ok(CosignKey {
        secret: derived.private_key,
        pubkey,
        sources: *sources,
    })
}

/// The same checks from the public side, for the owner or an auditor.
pub fn verify_cosign_xpub<C: Verification>(
    secp: &Secp256k1<C>,
    xpub: &Xpub,
    vault_pubkey: &PublicKey,
    sources: &XpubSources,
) -> Result<(), KeyMismatch> {
    let (pubkey, derived_sources) = cosign_commitment(secp, xpub, sources.cosign_hd_index)?;
    if derived_sources.parent_fingerprint != sources.parent_fingerprint {
        return Err(KeyMismatch::Fingerprint {
            expected: sources.parent_fingerprint.to_string(),
            actual: derived_sources.parent_fingerprint.to_string(),
        });
    }
    check_child(sources.cosign_hd_index, &pubkey, vault_pubkey)
}

/// Commitment for a new lock: the child key at `index` and its sources.
pub fn cosign_commitment<C: Verification>(
    secp: &Secp256k1<C>,
    xpub: &Xpub,
    index: u32,
) -> Result<(PublicKey, XpubSources), KeyMismatch> {
    let child = xpub
        .ckd_pub(secp, normal_child(index)?)
        .map_err(|e| KeyMismatch::Derivation(e.to_string()))?;
    Ok((
        PublicKey::new(child.public_key),
        XpubSources {
            parent_fingerprint: xpub.fingerprint(),
            cosign_hd_index: index,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;

    fn custodian() -> Xpriv {
        Xpriv::new_master(Network::Regtest, &[0x42; 32]).unwrap()
    }

    fn commitment(index: u32) -> (PublicKey, XpubSources) {
        let secp = Secp256k1::new();
        let xpub = Xpub::from_priv(&secp, &custodian());
        cosign_commitment(&secp, &xpub, index).unwrap()
    }

    #[test]
    fn test_correct_index_passes() {
        let secp = Secp256k1::new();
        let (vault_pubkey, sources) = commitment(7);

        let key = verify_cosign_key(&secp, &custodian(), &vault_pubkey, &sources).unwrap();
        assert_eq!(key.pubkey(), &vault_pubkey);
        assert_eq!(key.sources().cosign_hd_index, 7);
    }

    #[test]
    fn test_other_index_rejected() {
        let secp = Secp256k1::new();
        let (vault_pubkey, mut sources) = commitment(7);
        sources.cosign_hd_index = 8;

        let result = verify_cosign_key(&secp, &custodian(), &vault_pubkey, &sources);
        assert!(matches!(result, Err(KeyMismatch::ChildKey { index: 8, .. })));
    }

    #[test]
    fn test_other_fingerprint_rejected() {
        let secp = Secp256k1::new();
        let (vault_pubkey, sources) = commitment(7);
        let other = Xpriv::new_master(Network::Regtest, &[0x43; 32]).unwrap();

        let result = verify_cosign_key(&secp, &other, &vault_pubkey, &sources);
        assert!(matches!(result, Err(KeyMismatch::Fingerprint { .. })));
    }

    #[test]
    fn test_hardened_index_rejected() {
        let secp = Secp256k1::new();
        let (vault_pubkey, mut sources) = commitment(7);
        sources.cosign_hd_index = 0x8000_0007;

        let result = verify_cosign_key(&secp, &custodian(), &vault_pubkey, &sources);
        assert_eq!(result.unwrap_err(), KeyMismatch::HardenedIndex(0x8000_0007));

        let xpub = Xpub::from_priv(&secp, &custodian());
        assert!(cosign_commitment(&secp, &xpub, 0x8000_0000).is_err());
    }

    #[test]
    fn test_xpub_and_xpriv_agree() {
        let secp = Secp256k1::new();
        let xpub = Xpub::from_priv(&secp, &custodian());
        let (vault_pubkey, sources) = commitment(3);

        assert!(verify_cosign_xpub(&secp, &xpub, &vault_pubkey, &sources).is_ok());

        let (other_pubkey, _) = commitment(4);
        assert!(matches!(
            verify_cosign_xpub(&secp, &xpub, &other_pubkey, &sources),
            Err(KeyMismatch::ChildKey { .. })
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let secp = Secp256k1::new();
        let (vault_pubkey, sources) = commitment(1);
        let key = verify_cosign_key(&secp, &custodian(), &vault_pubkey, &sources).unwrap();
        let secret_hex = key.secret().display_secret().to_string();

        assert!(!format!("{:?}", key).contains(&secret_hex));
    }
}
