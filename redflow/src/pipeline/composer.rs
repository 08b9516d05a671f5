//! Assembles the stages into a full reduction of one raw run.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::CachedGeometryFactory;
use super::config::{MaskSetting, PipelineConfig};
use super::resolve::{query_background, query_calibration, query_dark, select_header};
use crate::broker::{Broker, Header};
use crate::core::{doc_stream, DocStream, Document, StartDoc};
use crate::errors::{ConfigError, ProtocolError, RedflowError};
use crate::kernels::{load_mask_file, CompressedMask, GeometryFactory};
use crate::observability::RunLogger;
use crate::stages::{
    auto_mask, background_subtraction, dark_subtraction, default_factory, integrate, polarization_correction, spoof,
    MaskInput, IMAGE_FIELD, MASK_FIELD,
};
use crate::streams::{peek, tee};

/// Streams and values the caller already has for a run.
///
/// Anything left `None` is looked up in the broker or derived from the raw
/// run itself.
#[derive(Default)]
pub struct PipelineInputs {
    /// Dark run to subtract.
    pub dark: Option<DocStream>,
    /// Background run to subtract after the dark.
    pub background: Option<DocStream>,
    /// Calibration stream whose first event holds the calibration.
    pub calibration: Option<DocStream>,
    /// Base mask for integration, overriding the configured mask setting.
    pub mask: Option<MaskInput>,
}

impl std::fmt::Debug for PipelineInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineInputs")
            .field("dark", &self.dark.is_some())
            .field("background", &self.background.is_some())
            .field("calibration", &self.calibration.is_some())
            .field("mask", &self.mask)
            .finish()
    }
}

impl PipelineInputs {
    /// Supplies the dark stream.
    #[must_use]
    pub fn with_dark(mut self, dark: DocStream) -> Self {
        self.dark = Some(dark);
        self
    }

    /// Supplies the background stream.
    #[must_use]
    pub fn with_background(mut self, background: DocStream) -> Self {
        self.background = Some(background);
        self
    }

    /// Supplies the calibration stream.
    #[must_use]
    pub fn with_calibration(mut self, calibration: DocStream) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Supplies the mask.
    #[must_use]
    pub fn with_mask(mut self, mask: MaskInput) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// Where a reduction's calibration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationSource {
    /// Passed in by the caller.
    Supplied,
    /// A stored calibration product.
    Stored(Header),
    /// Read out of the raw run's own start document.
    Spoofed,
}

/// A reduction in progress: iterate it to pull the integrated run.
pub struct Reduction {
    /// Start document of the raw run.
    pub raw_start: StartDoc,
    /// Stored dark run that was subtracted, if one was found.
    pub dark: Option<Header>,
    /// Stored background run that was subtracted, if one was found.
    pub background: Option<Header>,
    /// True if a dark correction is part of the chain.
    pub dark_applied: bool,
    /// True if a background correction is part of the chain.
    pub background_applied: bool,
    /// Origin of the calibration.
    pub calibration: CalibrationSource,
    stream: DocStream,
}

impl std::fmt::Debug for Reduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reduction")
            .field("raw_start", &self.raw_start.uid)
            .field("dark_applied", &self.dark_applied)
            .field("background_applied", &self.background_applied)
            .field("calibration", &self.calibration)
            .finish_non_exhaustive()
    }
}

impl Reduction {
    /// The integrated run as a plain stream.
    pub fn into_stream(self) -> DocStream {
        self.stream
    }
}

impl Iterator for Reduction {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.stream.next()
    }
}

/// Per-run selections, cleared when the next run begins.
#[derive(Debug, Default)]
struct CombineState {
    dark: Option<Header>,
    background: Option<Header>,
}

/// Builds, per raw run, the chain
/// dark subtraction → background subtraction → polarization → mask →
/// integration.
///
/// Missing darks and backgrounds are skipped with a warning. A missing
/// calibration is read from the raw run itself.
pub struct ReductionPipeline {
    config: PipelineConfig,
    broker: Arc<dyn Broker>,
    analysis: Arc<dyn Broker>,
    geometry: Arc<CachedGeometryFactory>,
    state: CombineState,
}

impl std::fmt::Debug for ReductionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReductionPipeline")
            .field("config", &self.config)
            .field("geometry", &self.geometry)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ReductionPipeline {
    /// Creates a composer querying `broker` for raw, dark, background and
    /// calibration runs.
    pub fn new(config: PipelineConfig, broker: Arc<dyn Broker>) -> Result<Self, ConfigError> {
        config.validate()?;
        let geometry = Arc::new(CachedGeometryFactory::new(
            default_factory(),
            config.calibration_key.clone(),
            config.calibration_history,
        ));
        Ok(Self {
            config,
            analysis: Arc::clone(&broker),
            broker,
            geometry,
            state: CombineState::default(),
        })
    }

    /// Looks stored calibration products up in a separate store.
    #[must_use]
    pub fn with_analysis_broker(mut self, analysis: Arc<dyn Broker>) -> Self {
        self.analysis = analysis;
        self
    }

    /// Replaces the geometry cache.
    #[must_use]
    pub fn with_geometry_cache(mut self, geometry: Arc<CachedGeometryFactory>) -> Self {
        self.geometry = geometry;
        self
    }

    /// The composer's configuration.
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The geometry cache shared by every reduction of this composer.
    pub const fn geometry_cache(&self) -> &Arc<CachedGeometryFactory> {
        &self.geometry
    }

    /// Dark chosen for the most recent run.
    pub const fn last_dark(&self) -> Option<&Header> {
        self.state.dark.as_ref()
    }

    /// Background chosen for the most recent run.
    pub const fn last_background(&self) -> Option<&Header> {
        self.state.background.as_ref()
    }

    fn fetch(&self, broker: &dyn Broker, candidates: Vec<Header>, start: &StartDoc, what: &str) -> Option<(Header, DocStream)> {
        let header = select_header(candidates, start, self.config.temporal_proximity)?;
        match broker.restream(&header, true) {
            Ok(stream) => {
                debug!(run_start = %start.uid, found = %header.uid(), "{what} selected");
                Some((header, stream))
            }
            Err(e) => {
                warn!(run_start = %start.uid, error = %e, "{what} could not be replayed");
                None
            }
        }
    }

    /// Reads the raw start without consuming it.
    fn peek_start(raw: DocStream) -> Result<(StartDoc, DocStream), RedflowError> {
        let (head, replay) = peek(raw);
        match head {
            Some(Document::Start(start)) => Ok((start, doc_stream(replay))),
            Some(other) => Err(ProtocolError::unexpected("raw", "start", other.kind()).into()),
            None => Err(ProtocolError::exhausted("raw", "start").into()),
        }
    }

    fn configured_mask(&self, start: &StartDoc) -> Result<Option<MaskInput>, RedflowError> {
        let mask = match &self.config.mask_setting {
            MaskSetting::Auto => return Ok(None),
            MaskSetting::None => MaskInput::None,
            MaskSetting::Path(path) => MaskInput::constant(load_mask_file(path)?),
            MaskSetting::Array => {
                return Err(ConfigError::new("mask_setting 'array' requires a mask in the pipeline inputs").into());
            }
            MaskSetting::Default => match start.get(MASK_FIELD) {
                Some(stored) => MaskInput::Compressed(CompressedMask::from_json(stored)?),
                None => {
                    warn!(run_start = %start.uid, "no stored mask in start document, integrating without a mask");
                    MaskInput::None
                }
            },
        };
        Ok(Some(mask))
    }

    /// Assembles the reduction of one raw run.
    ///
    /// Returns synchronously only for configuration and stream-shape
    /// errors; anything that goes wrong while processing events ends the
    /// output run with a failure stop instead.
    pub fn reduce(&mut self, raw: DocStream, inputs: PipelineInputs) -> Result<Reduction, RedflowError> {
        let (start, raw) = Self::peek_start(raw)?;
        if start.get("is_dark") == Some(&serde_json::Value::Bool(true)) {
            warn!(run_start = %start.uid, "dark run handed to the reduction, skipping");
            return Err(RedflowError::DarkRun(start.uid));
        }
        self.state = CombineState::default();
        self.geometry.observe_run(&start);
        info!(run_start = %start.uid, "assembling reduction");
        let factory: Arc<dyn GeometryFactory> = self.geometry.clone();

        let calibration = match inputs.calibration {
            Some(stream) => Some((stream, CalibrationSource::Supplied)),
            None => {
                let stored = query_calibration(self.analysis.as_ref(), &start, &self.config.calibration_key);
                self.fetch(self.analysis.as_ref(), stored, &start, "calibration")
                    .map(|(header, stream)| (stream, CalibrationSource::Stored(header)))
            }
        };
        let (raw, calibration, calibration_source) = match calibration {
            Some((stream, source)) => (raw, stream, source),
            None => {
                debug!(run_start = %start.uid, "no stored calibration, reading it from the start document");
                let [raw, spoof_input] = fan_out(raw);
                let spoofed = doc_stream(spoof(spoof_input, self.config.spoof.clone())?);
                (raw, spoofed, CalibrationSource::Spoofed)
            }
        };

        let dark = match inputs.dark {
            Some(stream) => Some((None, stream)),
            None => {
                let found = query_dark(self.broker.as_ref(), &start, &self.config.dark_key);
                self.fetch(self.broker.as_ref(), found, &start, "dark")
                    .map(|(h, s)| (Some(h), s))
            }
        };
        let dark_applied = dark.is_some();
        let (mut image, mut image_field) = match dark {
            Some((header, dark)) => {
                self.state.dark = header;
                let corrected = dark_subtraction(raw, dark, self.config.dark.clone())?;
                (doc_stream(corrected), IMAGE_FIELD.to_string())
            }
            None => {
                warn!(run_start = %start.uid, "no dark found, skipping dark subtraction");
                (raw, self.config.dark.image_field.clone())
            }
        };

        let background = match inputs.background {
            Some(stream) => Some((None, stream, self.config.background.background_field.clone())),
            None => self.stored_background(&start)?,
        };
        let background_applied = background.is_some();
        if let Some((header, background, background_field)) = background {
            self.state.background = header;
            let config = self
                .config
                .background
                .clone()
                .with_image_field(&image_field)
                .with_background_field(background_field);
            image = doc_stream(background_subtraction(image, background, config)?);
            image_field = IMAGE_FIELD.to_string();
        }

        let [cal_polarization, cal_mask, cal_integration] = fan_out(calibration);
        let polarized = polarization_correction(
            image,
            cal_polarization,
            self.config.polarization.clone().with_image_field(&image_field),
            Arc::clone(&factory),
        )?;
        let polarized = doc_stream(polarized);

        let mask = match inputs.mask {
            Some(mask) => Some(mask),
            None => self.configured_mask(&start)?,
        };
        let (image, mask) = match mask {
            Some(mask) => {
                drop(cal_mask);
                (polarized, mask)
            }
            None => {
                let [image, mask_image] = fan_out(polarized);
                let masks = auto_mask(
                    mask_image,
                    cal_mask,
                    MaskInput::None,
                    self.config.mask.clone().with_image_field(IMAGE_FIELD),
                    Arc::clone(&factory),
                )?;
                (image, MaskInput::Stream(doc_stream(masks)))
            }
        };

        let integrated = integrate(
            image,
            cal_integration,
            mask,
            self.config.integration.clone().with_image_field(IMAGE_FIELD),
            factory,
        )?;
        let stream = RunLogger::new("integration").wrap(doc_stream(integrated));

        Ok(Reduction {
            raw_start: start,
            dark: self.state.dark.clone(),
            background: self.state.background.clone(),
            dark_applied,
            background_applied,
            calibration: calibration_source,
            stream,
        })
    }

    /// Finds the background run and, when it has one, subtracts its own
    /// dark. Returns the header, the stream and its image field.
    fn stored_background(&self, start: &StartDoc) -> Result<Option<(Option<Header>, DocStream, String)>, RedflowError> {
        let key = &self.config.background_key;
        if start.get(key).is_none() {
            return Ok(None);
        }
        let found = query_background(self.broker.as_ref(), start, key);
        let Some((header, background)) = self.fetch(self.broker.as_ref(), found, start, "background") else {
            warn!(run_start = %start.uid, "no background found, skipping background subtraction");
            return Ok(None);
        };
        let darks = query_dark(self.broker.as_ref(), &header.start, &self.config.dark_key);
        match self.fetch(self.broker.as_ref(), darks, &header.start, "background dark") {
            Some((_, dark)) => {
                let corrected = dark_subtraction(background, dark, self.config.dark.clone())?;
                Ok(Some((Some(header), doc_stream(corrected), IMAGE_FIELD.to_string())))
            }
            None => {
                warn!(background = %header.uid(), "no dark for the background, using it uncorrected");
                let field = self.config.dark.image_field.clone();
                Ok(Some((Some(header), background, field)))
            }
        }
    }
}

/// Tees `stream` into `N` independent streams.
fn fan_out<const N: usize>(stream: DocStream) -> [DocStream; N] {
    let mut branches = tee(stream, N).into_iter();
    std::array::from_fn(|_| match branches.next() {
        Some(branch) => doc_stream(branch),
        None => doc_stream(std::iter::empty()),
    })
}
