pub mod controls;
pub mod display;

pub use controls::EffectControls;
pub use display::Sdl2Display;
