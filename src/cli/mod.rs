//! Terminal output for the operator binary

pub mod renderer;

pub use renderer::EventRenderer;
