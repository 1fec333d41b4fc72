//! # stem-splitter-service
//!
//! Accepts an uploaded recording and a lane, runs a pretrained
//! source-separation model over it, and returns the resulting stems as
//! addressable WAV files. Raw lanes return every model stem; reduction lanes
//! return vocals plus an instrumental mixed from the remaining stems.

pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod types;
pub mod workspace;

pub use crate::{
    config::ServiceConfig,
    core::{
        aggregate::{aggregate, Aggregation, INSTRUMENTAL, VOCALS},
        audio::{read_audio, write_audio},
        engine::{EngineOptions, SeparationEngine},
        lane::{Lane, LanePolicy, UnknownLanePolicy},
    },
    error::{Result, StemError},
    model::{manager::ensure_model, ModelInfo, ModelManifest, SeparationModel},
    pipeline::Processor,
    types::{OutputEncoding, ProcessResponse, ResultEntry, Stem, StemSet, Upload, Waveform},
    workspace::Workspace,
};
