//! Command-line surface for the core runner (spec.md §6).
//!
//! The teacher only ever reads `std::env::var` flags (`MM_SHADOW_MODE`,
//! `MM_HARVEST_TICKS`, ...); this crate's surface is wide enough — asset
//! selection, network, capital, and four independent feature toggles — to
//! warrant `clap`'s derive API instead of hand-rolled env parsing.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "mm-core", about = "Per-asset market-making strategy runner")]
pub struct Cli {
    /// Quote a single asset, e.g. "BTC". Mutually exclusive with --all.
    #[arg(long)]
    pub symbol: Option<String>,

    /// Quote every asset in the venue's universe, splitting --capital evenly.
    #[arg(long)]
    pub all: bool,

    /// Run against Hyperliquid testnet instead of mainnet.
    #[arg(long, conflicts_with = "mainnet")]
    pub testnet: bool,

    /// Run against Hyperliquid mainnet (the default if neither flag is given).
    #[arg(long, conflicts_with = "testnet")]
    pub mainnet: bool,

    /// Total capital in USD to allocate (split across assets under --all).
    #[arg(long, default_value_t = 1_000.0)]
    pub capital: f64,

    /// Suppress quoting when the market spread is too thin to clear the maker fee.
    #[arg(long)]
    pub fee_aware: bool,

    /// Feed the toxicity detector's reading into the quote pricer's suppression gate.
    #[arg(long)]
    pub toxicity: bool,

    /// Let the AutoTuner swap in revised QuoteParams every 4h window.
    #[arg(long)]
    pub auto_tune: bool,

    /// Reinvest realised PnL into active capital (spec.md §4.9 capital rule).
    #[arg(long)]
    pub compound: bool,

    /// Path to the live_params hot-reload snapshot (per-asset QuoteParams overrides).
    #[arg(long, default_value = "live_params.json")]
    pub live_params_path: String,

    /// Path to the allocations hot-reload snapshot (MetaSupervisor output).
    #[arg(long, default_value = "allocations.json")]
    pub allocations_path: String,
}

/// Process exit codes (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Normal = 0,
    Misconfiguration = 2,
    UnrecoverableVenueError = 3,
    RiskHalted = 4,
}

impl Cli {
    /// Validates the flag combination itself (clap handles the
    /// `--testnet`/`--mainnet` mutual exclusion already); returns
    /// `Misconfiguration` on the remaining cross-flag rule spec.md §6
    /// implies: exactly one of `--symbol`/`--all` must be given.
    pub fn validate(&self) -> Result<(), ExitCode> {
        match (&self.symbol, self.all) {
            (Some(_), false) | (None, true) => Ok(()),
            (Some(_), true) => {
                log::error!("--symbol and --all are mutually exclusive");
                Err(ExitCode::Misconfiguration)
            }
            (None, false) => {
                log::error!("one of --symbol or --all is required");
                Err(ExitCode::Misconfiguration)
            }
        }
    }

    pub fn is_testnet(&self) -> bool {
        self.testnet
    }
}
