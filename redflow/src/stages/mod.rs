//! The stage engine and the stage catalogue.
//!
//! A stage is a [`StageMachine`] driving a [`StageKernel`]. The machine reads
//! the start and descriptor of every input, asks the kernel to prepare, then
//! maps primary events one at a time. Whatever the kernel does, the output is
//! a complete run: start, descriptor, events, stop.
//!
//! Stages are iterators; nothing happens until the output is pulled.

mod background;
mod dark;
mod geometry_input;
mod input;
mod integrate;
mod machine;
mod mask;
mod mask_input;
mod polarization;
mod spoof;

pub use background::{background_subtraction, BackgroundSubtraction, BackgroundSubtractionConfig};
pub use dark::{dark_subtraction, DarkSubtraction, DarkSubtractionConfig, IMAGE_FIELD, RAW_IMAGE_FIELD};
pub use geometry_input::{default_factory, CALIBRATION_FIELD};
pub use input::{Lookahead, StageInput};
pub use integrate::{integrate, Integration, IntegrationConfig, IQ_FIELD, Q_FIELD};
pub use machine::{Cadence, EventData, StageKernel, StageMachine};
pub use mask::{auto_mask, margin_mask, static_mask, AutoMask, AutoMaskConfig, MarginMask, MarginMaskConfig, StaticMask};
pub use mask_input::{classify_mask_stream, MaskInput, MASK_FIELD};
pub use polarization::{polarization_correction, PolarizationConfig, PolarizationCorrection};
pub use spoof::{spoof, Spoof, SpoofConfig};
