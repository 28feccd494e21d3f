//! Shared fixtures: sim venues plus an application builder that can be
//! re-run over the same data directory to model a process restart.

use carry_bot::{AppConfig, Application, BotDeps};
use carry_core::{Asset, FundingSnapshot, Price};
use carry_state::JournalStore;
use carry_venues::{
    JsonlPositionStore, SimChainClient, SimConsensus, SimLongVenue, SimPriceBoard, SimShortVenue,
};
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;

/// The default watchlist asset, as the sims know it.
pub fn default_asset() -> Asset {
    Asset::new(
        "jitoSOL",
        "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn",
        "SOL",
        true,
    )
}

/// Sim venue state. Held outside the application so it survives a
/// "restart": killing a process does not reset the venues.
pub struct Venues {
    pub board: Arc<SimPriceBoard>,
    pub long_venue: Arc<SimLongVenue>,
    pub short_venue: Arc<SimShortVenue>,
    pub consensus: Arc<SimConsensus>,
    pub long_chain: Arc<SimChainClient>,
    pub short_chain: Arc<SimChainClient>,
}

/// Venues seeded so the default watchlist entry passes the entry gate
/// and preflight: both prices 100, funding paying the short, funded
/// wallet and margin account.
pub fn venues() -> Venues {
    let board = SimPriceBoard::new();
    board.set_prices(&default_asset(), Price::new(dec!(100)), Price::new(dec!(100)));
    board.set_funding("SOL", FundingSnapshot::new(dec!(-0.0001), dec!(-0.00008)));

    let long_chain = Arc::new(SimChainClient::new("solana"));
    long_chain.set_balance(dec!(5));
    long_chain.set_token_balance("USDC", dec!(100_000));

    Venues {
        long_venue: Arc::new(SimLongVenue::new(board.clone())),
        short_venue: Arc::new(SimShortVenue::new(board.clone(), dec!(50_000))),
        consensus: Arc::new(SimConsensus::new(board.clone())),
        long_chain,
        short_chain: Arc::new(SimChainClient::new("hyperliquid")),
        board,
    }
}

/// Application over the given venues with fresh durable stores under
/// `data_dir`. Calling this twice with the same directory models a
/// restart: venue state carries over, in-memory state does not.
pub fn app_over(venues: &Venues, data_dir: &Path) -> Application {
    let mut config = AppConfig::default();
    config.store.data_dir = data_dir.to_str().unwrap().to_string();

    let journal = Arc::new(JournalStore::open(data_dir, config.store.journal()).unwrap());
    let position_store = Arc::new(JsonlPositionStore::open(data_dir).unwrap());

    let deps = BotDeps {
        state_store: journal,
        long_venue: venues.long_venue.clone(),
        short_venue: venues.short_venue.clone(),
        consensus: venues.consensus.clone(),
        long_chain: venues.long_chain.clone(),
        short_chain: venues.short_chain.clone(),
        position_store,
    };
    Application::with_deps(config, deps)
}
