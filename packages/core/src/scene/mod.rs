//! Scene/compositor control (OBS WebSocket v5) and its health supervision.

mod controller;
mod health_supervisor;

pub use controller::SceneController;
pub use health_supervisor::SceneHealthSupervisor;
