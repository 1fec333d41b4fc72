pub mod aggregate;
pub mod assemble;
pub mod audio;
#[cfg(feature = "onnx")]
pub mod dsp;
pub mod engine;
pub mod lane;
pub mod resample;
