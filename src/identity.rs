// =============================================================================
// Identity Resolver — handle/address → wallet (one call, at startup)
// =============================================================================
//
// Invoked exactly once during startup. Failure is fatal: a copy-trading
// engine with no resolved source wallet has nothing to observe.
// =============================================================================

use anyhow::{bail, Result};
use tracing::info;

use crate::config::looks_like_wallet;
use crate::http_client::MarketClient;

/// Resolve `source` (an `@handle` or a `0x`-wallet) to a wallet address.
///
/// - A 42-character `0x`-prefixed string is returned unchanged.
/// - Otherwise the leading `@` is stripped and a single profile-directory
///   search is performed: prefer an exact case-insensitive pseudonym match,
///   falling back to the first profile carrying a `proxyWallet`.
pub async fn resolve_wallet(client: &MarketClient, source: &str) -> Result<String> {
    if looks_like_wallet(source) {
        return Ok(source.to_string());
    }

    let handle = source.strip_prefix('@').unwrap_or(source);
    let profiles = client.search_profiles(handle).await?;

    if let Some(exact) = profiles
        .iter()
        .find(|p| p.pseudonym.eq_ignore_ascii_case(handle))
    {
        if let Some(wallet) = &exact.proxy_wallet {
            info!(handle, wallet, "identity resolved via exact pseudonym match");
            return Ok(wallet.clone());
        }
    }

    if let Some(fallback) = profiles.iter().find(|p| p.proxy_wallet.is_some()) {
        let wallet = fallback.proxy_wallet.clone().unwrap();
        info!(handle, wallet, "identity resolved via first available proxyWallet");
        return Ok(wallet);
    }

    bail!("identity resolution failed: no profile with a wallet found for '{source}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_input_returns_unchanged() {
        // A direct wallet never touches the network, so this can run without
        // a client — exercised indirectly through `looks_like_wallet`.
        assert!(looks_like_wallet(
            "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd"
        ));
    }
}
