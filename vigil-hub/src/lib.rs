/**
 * VIGIL HUB - Hub de site : événements capteurs → alertes enregistrées et diffusées
 *
 * ARCHITECTURE :
 * - mqtt → dispatch → pipeline (capture, analyse, stockage, diffusion)
 * - registry : cache des drapeaux + auto-enregistrement, rafraîchi par sync
 * - http : historique, websocket temps réel, flux MJPEG, derrière jeton bearer
 */

pub mod analyzer;
pub mod auth;
pub mod bootstrap;
pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod store;
pub mod sync;
pub mod video;

#[cfg(test)]
mod testing;

pub use error::{HubError, Result};
pub use state::HubContext;
