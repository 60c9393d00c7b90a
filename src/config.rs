// =============================================================================
// Configuration & CLI — flags, latency profiles, validation
// =============================================================================
//
// Every tunable lives here so the rest of the engine only ever reads a single
// `Config`. Fields carry `#[serde(default = "...")]` the same way the
// reference engine's hot-reloadable config does, even though this config is
// never persisted — it keeps a partially-specified fixture (as used in
// tests) resolving to a fully valid `Config`.
//
// Profiles are applied *after* flags are parsed, so an explicit tuning flag
// always wins over the profile's preset.
// =============================================================================

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

fn default_mode() -> Mode {
    Mode::Paper
}
fn default_profile() -> Profile {
    Profile::Fast
}
fn default_size_mode() -> SizeMode {
    SizeMode::Percent
}
fn default_min_price() -> f64 {
    0.01
}
fn default_max_price() -> f64 {
    0.99
}
fn default_max_lag_ms() -> u64 {
    1500
}
fn default_max_spread() -> f64 {
    0.05
}
fn default_cross_tick() -> f64 {
    0.01
}
fn default_bootstrap_seconds() -> u64 {
    30
}
fn default_reconcile_seconds() -> u64 {
    5
}
fn default_trade_fetch_limit() -> u32 {
    50
}
fn default_max_parallel() -> usize {
    4
}
fn default_min_asset_refresh_ms() -> u64 {
    500
}
fn default_refresh_debounce_ms() -> u64 {
    300
}
fn default_activity_cache_ms() -> u64 {
    200
}
fn default_book_ttl_ms() -> u64 {
    2000
}
fn default_ws_url() -> String {
    "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string()
}
fn default_profile_base_url() -> String {
    "https://polymarket.com/api/profile".to_string()
}
fn default_activity_base_url() -> String {
    "https://data-api.polymarket.com/activity".to_string()
}
fn default_book_base_url() -> String {
    "https://clob.polymarket.com/book".to_string()
}
fn default_execution_bridge() -> String {
    "python-bridge".to_string()
}
fn default_live_exec() -> String {
    "python-bridge".to_string()
}

/// Paper mode prints intents only; live mode invokes the execution adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Paper,
    Live,
}

/// Preset bundle adjusting the latency knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Fast,
    Turbo,
}

/// Sizing rule used to scale the mirror order against the source trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeMode {
    Percent,
    Fixed,
}

/// Fully-resolved, validated runtime configuration for one engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: String,

    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_profile")]
    pub profile: Profile,
    #[serde(default = "default_size_mode")]
    pub size_mode: SizeMode,

    #[serde(default)]
    pub my_balance_usdc: f64,
    #[serde(default)]
    pub source_balance_usdc: f64,
    #[serde(default)]
    pub fixed_order_usdc: f64,

    #[serde(default = "default_min_price")]
    pub min_price: f64,
    #[serde(default = "default_max_price")]
    pub max_price: f64,

    #[serde(default = "default_max_lag_ms")]
    pub max_lag_ms: u64,
    #[serde(default = "default_max_spread")]
    pub max_spread: f64,
    #[serde(default = "default_cross_tick")]
    pub cross_tick: f64,

    #[serde(default = "default_bootstrap_seconds")]
    pub bootstrap_seconds: u64,
    #[serde(default = "default_reconcile_seconds")]
    pub reconcile_seconds: u64,
    #[serde(default = "default_trade_fetch_limit")]
    pub trade_fetch_limit: u32,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    #[serde(default = "default_min_asset_refresh_ms")]
    pub min_asset_refresh_ms: u64,
    #[serde(default = "default_refresh_debounce_ms")]
    pub refresh_debounce_ms: u64,
    #[serde(default = "default_activity_cache_ms")]
    pub activity_cache_ms: u64,

    #[serde(default)]
    pub book_http_fallback: bool,
    #[serde(default = "default_book_ttl_ms")]
    pub book_ttl_ms: u64,

    #[serde(default)]
    pub benchmark_seconds: u64,
    #[serde(default)]
    pub stats_every: u64,

    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_profile_base_url")]
    pub profile_base_url: String,
    #[serde(default = "default_activity_base_url")]
    pub activity_base_url: String,
    #[serde(default = "default_book_base_url")]
    pub book_base_url: String,
    #[serde(default = "default_execution_bridge")]
    pub execution_bridge: String,
    #[serde(default = "default_live_exec")]
    pub live_exec: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: String::new(),
            mode: default_mode(),
            profile: default_profile(),
            size_mode: default_size_mode(),
            my_balance_usdc: 0.0,
            source_balance_usdc: 0.0,
            fixed_order_usdc: 0.0,
            min_price: default_min_price(),
            max_price: default_max_price(),
            max_lag_ms: default_max_lag_ms(),
            max_spread: default_max_spread(),
            cross_tick: default_cross_tick(),
            bootstrap_seconds: default_bootstrap_seconds(),
            reconcile_seconds: default_reconcile_seconds(),
            trade_fetch_limit: default_trade_fetch_limit(),
            max_parallel: default_max_parallel(),
            min_asset_refresh_ms: default_min_asset_refresh_ms(),
            refresh_debounce_ms: default_refresh_debounce_ms(),
            activity_cache_ms: default_activity_cache_ms(),
            book_http_fallback: true,
            book_ttl_ms: default_book_ttl_ms(),
            benchmark_seconds: 0,
            stats_every: 50,
            ws_url: default_ws_url(),
            profile_base_url: default_profile_base_url(),
            activity_base_url: default_activity_base_url(),
            book_base_url: default_book_base_url(),
            execution_bridge: default_execution_bridge(),
            live_exec: default_live_exec(),
        }
    }
}

impl Config {
    /// Apply a latency profile preset. Called *after* flags are parsed so
    /// that an explicit flag still overrides the profile's values — callers
    /// track which fields were explicitly set and re-apply them afterward.
    pub fn apply_profile(&mut self) {
        match self.profile {
            Profile::Fast => {
                // Fast is the default bundle; leave moderate defaults as-is.
            }
            Profile::Turbo => {
                self.refresh_debounce_ms = self.refresh_debounce_ms.min(120);
                self.min_asset_refresh_ms = self.min_asset_refresh_ms.min(200);
                self.max_parallel = self.max_parallel.max(8);
                self.book_http_fallback = false;
            }
        }
    }

    /// Validate the resolved config, matching the reference engine's
    /// fail-fast startup validation.
    pub fn validate(&self) -> Result<()> {
        if self.source.is_empty() {
            bail!("config error: --source is required");
        }
        match self.size_mode {
            SizeMode::Percent => {
                if self.my_balance_usdc <= 0.0 {
                    bail!("config error: --my-balance-usdc must be > 0 in percent mode");
                }
                if self.source_balance_usdc <= 0.0 {
                    bail!("config error: --source-balance-usdc must be > 0 in percent mode");
                }
            }
            SizeMode::Fixed => {
                if self.fixed_order_usdc <= 0.0 {
                    bail!("config error: --fixed-order-usdc must be > 0 in fixed mode");
                }
            }
        }
        if self.reconcile_seconds < 2 {
            bail!("config error: --reconcile-seconds must be >= 2");
        }
        Ok(())
    }
}

/// Parsed CLI flags before defaults/profile/validation are applied.
///
/// `--help`/`-h` is handled by the caller before this parser runs (it must
/// exit 0 unconditionally, bypassing validation). Unknown flags are silently
/// ignored. A flag whose following token itself starts with `--` is treated
/// as a valueless boolean switch rather than consuming the next flag's value.
pub fn parse_args(args: &[String]) -> Result<Config> {
    let mut cfg = Config::default();
    let mut explicit_refresh_debounce = false;
    let mut explicit_min_asset_refresh = false;
    let mut explicit_max_parallel = false;
    let mut explicit_book_fallback = false;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let takes_value = i + 1 < args.len() && !args[i + 1].starts_with("--");
        let value = || -> &str { args[i + 1].as_str() };

        match flag {
            "--source" if takes_value => cfg.source = value().to_string(),
            "--mode" if takes_value => {
                cfg.mode = match value() {
                    "live" => Mode::Live,
                    _ => Mode::Paper,
                }
            }
            "--paper" => cfg.mode = Mode::Paper,
            "--live" => cfg.mode = Mode::Live,
            "--profile" if takes_value => {
                cfg.profile = match value() {
                    "turbo" => Profile::Turbo,
                    _ => Profile::Fast,
                }
            }
            "--size-mode" if takes_value => {
                cfg.size_mode = match value() {
                    "fixed" => SizeMode::Fixed,
                    _ => SizeMode::Percent,
                }
            }
            "--my-balance-usdc" if takes_value => cfg.my_balance_usdc = parse_f64(value())?,
            "--source-balance-usdc" if takes_value => {
                cfg.source_balance_usdc = parse_f64(value())?
            }
            "--fixed-order-usdc" if takes_value => cfg.fixed_order_usdc = parse_f64(value())?,
            "--min-price" if takes_value => cfg.min_price = parse_f64(value())?,
            "--max-price" if takes_value => cfg.max_price = parse_f64(value())?,
            "--max-lag-ms" if takes_value => cfg.max_lag_ms = parse_u64(value())?,
            "--max-spread" if takes_value => cfg.max_spread = parse_f64(value())?,
            "--cross-tick" if takes_value => cfg.cross_tick = parse_f64(value())?,
            "--bootstrap-seconds" if takes_value => cfg.bootstrap_seconds = parse_u64(value())?,
            "--reconcile-seconds" if takes_value => cfg.reconcile_seconds = parse_u64(value())?,
            "--trade-fetch-limit" if takes_value => {
                cfg.trade_fetch_limit = parse_u64(value())? as u32
            }
            "--max-parallel" if takes_value => {
                cfg.max_parallel = parse_u64(value())? as usize;
                explicit_max_parallel = true;
            }
            "--min-asset-refresh-ms" if takes_value => {
                cfg.min_asset_refresh_ms = parse_u64(value())?;
                explicit_min_asset_refresh = true;
            }
            "--refresh-debounce-ms" if takes_value => {
                cfg.refresh_debounce_ms = parse_u64(value())?;
                explicit_refresh_debounce = true;
            }
            "--activity-cache-ms" if takes_value => cfg.activity_cache_ms = parse_u64(value())?,
            "--book-http-fallback" if takes_value => {
                cfg.book_http_fallback = value() == "true";
                explicit_book_fallback = true;
            }
            "--book-ttl-ms" if takes_value => cfg.book_ttl_ms = parse_u64(value())?,
            "--benchmark-seconds" if takes_value => cfg.benchmark_seconds = parse_u64(value())?,
            "--stats-every" if takes_value => cfg.stats_every = parse_u64(value())?,
            "--ws-url" if takes_value => cfg.ws_url = value().to_string(),
            "--profile-base-url" if takes_value => cfg.profile_base_url = value().to_string(),
            "--activity-base-url" if takes_value => cfg.activity_base_url = value().to_string(),
            "--book-base-url" if takes_value => cfg.book_base_url = value().to_string(),
            "--execution-bridge" if takes_value => cfg.execution_bridge = value().to_string(),
            "--live-exec" if takes_value => cfg.live_exec = value().to_string(),
            _ => {
                // Unknown or valueless flag — silently ignored per the CLI contract.
            }
        }

        i += if takes_value && flag.starts_with("--") && flag != "--paper" && flag != "--live" {
            2
        } else {
            1
        };
    }

    // Snapshot explicit overrides, apply the profile, then restore them —
    // this is what "profile applied after flags, but flags still win" means.
    let saved_refresh_debounce = cfg.refresh_debounce_ms;
    let saved_min_asset_refresh = cfg.min_asset_refresh_ms;
    let saved_max_parallel = cfg.max_parallel;
    let saved_book_fallback = cfg.book_http_fallback;

    cfg.apply_profile();

    if explicit_refresh_debounce {
        cfg.refresh_debounce_ms = saved_refresh_debounce;
    }
    if explicit_min_asset_refresh {
        cfg.min_asset_refresh_ms = saved_min_asset_refresh;
    }
    if explicit_max_parallel {
        cfg.max_parallel = saved_max_parallel;
    }
    if explicit_book_fallback {
        cfg.book_http_fallback = saved_book_fallback;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn parse_f64(s: &str) -> Result<f64> {
    s.parse()
        .map_err(|_| anyhow::anyhow!("config error: could not parse '{s}' as a number"))
}

fn parse_u64(s: &str) -> Result<u64> {
    s.parse()
        .map_err(|_| anyhow::anyhow!("config error: could not parse '{s}' as an integer"))
}

/// `true` if `arg` looks like a 0x-prefixed 42-character wallet address.
pub fn looks_like_wallet(arg: &str) -> bool {
    arg.starts_with("0x") && arg.len() == 42
}

pub const USAGE: &str = "\
clob-mirror --source <@handle|0xwallet> [--paper|--live] [flags...]

  --source <id>                 required: @handle or 0x-wallet of the source trader
  --mode <paper|live>           default: paper
  --profile <fast|turbo>        default: fast
  --size-mode <percent|fixed>   default: percent
  --my-balance-usdc <f>         percent mode: your balance
  --source-balance-usdc <f>     percent mode: source's balance
  --fixed-order-usdc <f>        fixed mode: notional per mirror order
  --min-price / --max-price <f> accept window + price clamp, default 0.01 / 0.99
  --max-lag-ms <n>              reject if event lag exceeds this
  --max-spread <f>              reject if top-of-book spread exceeds this
  --cross-tick <f>              price aggressiveness when crossing
  --bootstrap-seconds <n>       replay window on startup
  --reconcile-seconds <n>       pull-loop period, minimum 2
  --trade-fetch-limit <n>       items per activity pull
  --max-parallel <n>            concurrent trade-processing tasks
  --min-asset-refresh-ms <n>    per-asset WS trigger cooldown
  --refresh-debounce-ms <n>     debounce horizon for refresh triggers
  --activity-cache-ms <n>       reuse window for the last activity payload
  --book-http-fallback <bool>   allow HTTP probe when book cache misses
  --book-ttl-ms <n>             book freshness horizon
  --benchmark-seconds <n>       self-stop after this many seconds
  --stats-every <n>             emit a latency summary every N samples
  --ws-url <url>                market WebSocket endpoint
  --profile-base-url <url>      profile search endpoint
  --activity-base-url <url>     activity feed endpoint
  --book-base-url <url>         order book probe endpoint
  --execution-bridge <path>     path to the live-execution subprocess bridge
  --live-exec <name>            execution adapter to use; only 'python-bridge' is implemented
";

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_source_is_a_config_error() {
        let err = parse_args(&args(&["--my-balance-usdc", "100"])).unwrap_err();
        assert!(err.to_string().contains("--source"));
    }

    #[test]
    fn percent_mode_requires_positive_balances() {
        let err = parse_args(&args(&[
            "--source",
            "@alice",
            "--my-balance-usdc",
            "0",
            "--source-balance-usdc",
            "100",
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("my-balance-usdc"));
    }

    #[test]
    fn fixed_mode_requires_positive_notional() {
        let err = parse_args(&args(&[
            "--source",
            "@alice",
            "--size-mode",
            "fixed",
            "--fixed-order-usdc",
            "0",
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("fixed-order-usdc"));
    }

    #[test]
    fn valid_percent_config_parses() {
        let cfg = parse_args(&args(&[
            "--source",
            "@alice",
            "--my-balance-usdc",
            "100",
            "--source-balance-usdc",
            "20000",
            "--live",
        ]))
        .unwrap();
        assert_eq!(cfg.mode, Mode::Live);
        assert!((cfg.my_balance_usdc - 100.0).abs() < 1e-9);
    }

    #[test]
    fn turbo_profile_tightens_knobs_unless_overridden() {
        let cfg = parse_args(&args(&[
            "--source",
            "@alice",
            "--my-balance-usdc",
            "1",
            "--source-balance-usdc",
            "1",
            "--profile",
            "turbo",
        ]))
        .unwrap();
        assert!(!cfg.book_http_fallback);
        assert!(cfg.max_parallel >= 8);
    }

    #[test]
    fn explicit_flag_overrides_profile_preset() {
        let cfg = parse_args(&args(&[
            "--source",
            "@alice",
            "--my-balance-usdc",
            "1",
            "--source-balance-usdc",
            "1",
            "--profile",
            "turbo",
            "--refresh-debounce-ms",
            "900",
        ]))
        .unwrap();
        assert_eq!(cfg.refresh_debounce_ms, 900);
    }

    #[test]
    fn valueless_flag_does_not_consume_next_flag() {
        let cfg = parse_args(&args(&[
            "--live",
            "--source",
            "@alice",
            "--my-balance-usdc",
            "1",
            "--source-balance-usdc",
            "1",
        ]))
        .unwrap();
        assert_eq!(cfg.mode, Mode::Live);
        assert_eq!(cfg.source, "@alice");
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let cfg = parse_args(&args(&[
            "--source",
            "@alice",
            "--my-balance-usdc",
            "1",
            "--source-balance-usdc",
            "1",
            "--totally-unknown-flag",
            "value",
        ]))
        .unwrap();
        assert_eq!(cfg.source, "@alice");
    }

    #[test]
    fn wallet_detection() {
        assert!(looks_like_wallet(
            "0x1234567890123456789012345678901234567890"
        ));
        assert!(!looks_like_wallet("@alice"));
    }
}
