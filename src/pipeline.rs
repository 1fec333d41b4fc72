use crate::{
    config::ServiceConfig,
    core::{
        aggregate::aggregate,
        assemble::ResultAssembler,
        audio::{read_audio, write_audio},
        engine::SeparationEngine,
        lane::{Lane, LanePolicy},
        resample::resample,
    },
    error::{Result, StemError},
    types::{OutputEncoding, ResultEntry, Upload},
    workspace::{RequestDir, Workspace},
};

use std::{sync::Arc, time::Instant};
use tracing::{info, info_span, warn};

const OUTPUT_EXT: &str = "wav";

/// Per-request pipeline: persist, decode, separate, apply the lane, write, assemble.
///
/// `handle` either returns every entry or a single error; on error the
/// request directory is removed so no partial output survives.
pub struct Processor {
    engine: Arc<SeparationEngine>,
    workspace: Workspace,
    lanes: LanePolicy,
    assembler: ResultAssembler,
    resample_input: bool,
    encoding: OutputEncoding,
}

impl Processor {
    pub fn new(engine: Arc<SeparationEngine>, workspace: Workspace, cfg: &ServiceConfig) -> Self {
        Self {
            engine,
            workspace,
            lanes: cfg.lanes.clone(),
            assembler: ResultAssembler::new(&cfg.public_prefix),
            resample_input: cfg.resample_input,
            encoding: cfg.output_encoding,
        }
    }

    pub fn engine(&self) -> &SeparationEngine {
        &self.engine
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn handle(&self, upload: Upload, lane: &str) -> Result<Vec<ResultEntry>> {
        let class = self.lanes.classify(lane)?;
        if upload.bytes.is_empty() {
            return Err(StemError::Upload(format!(
                "uploaded file `{}` is empty",
                upload.file_name
            )));
        }

        let request = self.workspace.create_request()?;
        let span = info_span!("request", id = %request.id(), %lane);
        let _entered = span.enter();

        let started = Instant::now();
        match self.run(&request, &upload, class) {
            Ok(entries) => {
                info!(
                    stems = entries.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request complete"
                );
                Ok(entries)
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "request failed, discarding output");
                request.discard();
                Err(e)
            }
        }
    }

    fn run(&self, request: &RequestDir, upload: &Upload, lane: Lane) -> Result<Vec<ResultEntry>> {
        let input_path = request.persist_upload(upload)?;

        let mut waveform = read_audio(&input_path)?;
        info!(
            sample_rate = waveform.sample_rate(),
            channels = waveform.channels(),
            seconds = waveform.duration_secs(),
            "input decoded"
        );

        let model_rate = self.engine.sample_rate();
        if self.resample_input && waveform.sample_rate() != model_rate {
            waveform = resample(&waveform, model_rate)?;
        }

        let stems = self.engine.separate(&waveform)?;
        drop(waveform);
        info!(sources = stems.len(), "separation finished");

        let aggregation = aggregate(stems, lane)?;

        let mut written = Vec::with_capacity(aggregation.tracks.len());
        for track in &aggregation.tracks {
            let path = request.output_path(&track.name, OUTPUT_EXT);
            write_audio(&path, &track.waveform, self.encoding)?;
            written.push((track.name.clone(), path));
        }

        self.assembler.assemble(request.id(), &written)
    }
}
