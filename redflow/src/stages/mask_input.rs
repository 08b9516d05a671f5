//! The optional base mask accepted by masking and integration stages.

use ndarray::Array2;
use std::sync::Arc;

use super::input::{Lookahead, StageInput};
use crate::core::{doc_stream, DataValue, DocStream, Document, EventDoc};
use crate::errors::{ConfigError, KernelError};
use crate::kernels::{decompress_mask, CompressedMask};
use crate::streams::peek_n;

/// Field that carries the mask in a mask stream's events.
pub const MASK_FIELD: &str = "mask";

/// Where a stage gets its base mask from.
pub enum MaskInput {
    /// No base mask.
    None,
    /// One mask for every event. `parent` is the start uid of the run it came
    /// from, if any.
    Constant {
        /// The mask, `true` = good.
        mask: Arc<Array2<bool>>,
        /// Start uid of the originating run.
        parent: Option<String>,
    },
    /// A CSR-compressed mask, expanded against the first image's shape.
    Compressed(CompressedMask),
    /// A per-event mask stream, paired with the images by position.
    Stream(DocStream),
    /// A mask stream that may hold a single constant mask or one mask per
    /// event; the stage decides by looking two documents ahead.
    Detect(DocStream),
}

impl std::fmt::Debug for MaskInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("MaskInput::None"),
            Self::Constant { mask, parent } => f
                .debug_struct("MaskInput::Constant")
                .field("shape", &mask.dim())
                .field("parent", parent)
                .finish(),
            Self::Compressed(c) => f.debug_tuple("MaskInput::Compressed").field(&c.nnz()).finish(),
            Self::Stream(_) => f.write_str("MaskInput::Stream(..)"),
            Self::Detect(_) => f.write_str("MaskInput::Detect(..)"),
        }
    }
}

impl MaskInput {
    /// A constant mask not derived from any run.
    #[must_use]
    pub fn constant(mask: Array2<bool>) -> Self {
        Self::Constant {
            mask: Arc::new(mask),
            parent: None,
        }
    }

    /// True if the stage will consume a stream for this input.
    #[must_use]
    pub const fn has_stream(&self) -> bool {
        matches!(self, Self::Stream(_) | Self::Detect(_))
    }
}

fn mask_of(event: &EventDoc) -> Result<Option<Arc<Array2<bool>>>, KernelError> {
    match event.require(MASK_FIELD)? {
        DataValue::Null => Ok(None),
        value => Ok(Some(Arc::clone(value.expect_mask(MASK_FIELD)?))),
    }
}

/// Decides once, while the pipeline is being built, whether `stream` is a
/// single constant mask or a live per-event mask stream.
///
/// Reads the start and descriptor and looks two documents further: if the
/// second is the stop, the first event's mask becomes a constant. Otherwise
/// the stream is returned intact as [`MaskInput::Stream`].
pub fn classify_mask_stream(stream: DocStream) -> Result<MaskInput, ConfigError> {
    let (head, replay) = peek_n(stream, 4);
    let invalid = |what: &str| ConfigError::new(format!("Mask stream is not a valid run: {what}"));
    match head.as_slice() {
        [Document::Start(start), Document::Descriptor(_), Document::Event(ev), Document::Stop(_)] => {
            let mask = mask_of(ev).map_err(|e| invalid(&e.to_string()))?;
            Ok(mask.map_or(MaskInput::None, |mask| MaskInput::Constant {
                mask,
                parent: Some(start.uid.clone()),
            }))
        }
        [Document::Start(_), Document::Descriptor(_), Document::Stop(_), ..] => Ok(MaskInput::None),
        [Document::Start(_), Document::Descriptor(_), Document::Event(_), Document::Event(_)] => {
            Ok(MaskInput::Stream(doc_stream(replay)))
        }
        [] => Err(invalid("empty stream")),
        _ => Err(invalid("expected start, descriptor, then events")),
    }
}

/// Per-stage state of the base mask, resolved during preparation.
#[derive(Debug)]
pub(crate) enum MaskSlot {
    Absent,
    Constant(Arc<Array2<bool>>),
    Compressed(CompressedMask),
    /// Index into the stage's auxiliary inputs.
    Live(usize),
    Detect(usize),
}

impl MaskSlot {
    /// Splits a [`MaskInput`] into the slot and, when it has one, the stream
    /// the stage must consume as auxiliary input number `aux_index`.
    pub(crate) fn from_input(input: MaskInput, aux_index: usize) -> (Self, Option<DocStream>, Option<String>) {
        match input {
            MaskInput::None => (Self::Absent, None, None),
            MaskInput::Constant { mask, parent } => (Self::Constant(mask), None, parent),
            MaskInput::Compressed(c) => (Self::Compressed(c), None, None),
            MaskInput::Stream(s) => (Self::Live(aux_index), Some(s), None),
            MaskInput::Detect(s) => (Self::Detect(aux_index), Some(s), None),
        }
    }

    /// True if the slot consumes an auxiliary stream.
    pub(crate) const fn has_stream(&self) -> bool {
        matches!(self, Self::Live(_) | Self::Detect(_))
    }

    /// Resolves a `Detect` slot by looking ahead in its stream.
    pub(crate) fn prepare(&mut self, aux: &mut [StageInput]) -> anyhow::Result<()> {
        if let Self::Detect(index) = *self {
            let input = aux
                .get_mut(index)
                .ok_or_else(|| anyhow::anyhow!("mask input {index} missing"))?;
            *self = match input.lookahead()? {
                Lookahead::Single(ev) => mask_of(&ev)?.map_or(Self::Absent, Self::Constant),
                Lookahead::Empty => Self::Absent,
                Lookahead::Many => Self::Live(index),
            };
        }
        Ok(())
    }

    /// The base mask for the current event of an image of `shape`.
    pub(crate) fn current(
        &mut self,
        aux: &mut [StageInput],
        shape: (usize, usize),
    ) -> anyhow::Result<Option<Arc<Array2<bool>>>> {
        let mask = match self {
            Self::Absent => None,
            Self::Constant(mask) => Some(Arc::clone(mask)),
            Self::Compressed(c) => {
                let mask = Arc::new(decompress_mask(c, shape)?);
                *self = Self::Constant(Arc::clone(&mask));
                Some(mask)
            }
            Self::Live(index) | Self::Detect(index) => {
                let index = *index;
                let input = aux
                    .get_mut(index)
                    .ok_or_else(|| anyhow::anyhow!("mask input {index} missing"))?;
                match input.next_latest()? {
                    Some(ev) => mask_of(ev)?,
                    None => None,
                }
            }
        };
        if let Some(m) = &mask {
            if m.dim() != shape {
                return Err(KernelError::ShapeMismatch {
                    expected: vec![shape.0, shape.1],
                    found: m.shape().to_vec(),
                }
                .into());
            }
        }
        Ok(mask)
    }
}

/// Wires an optional base mask into a stage's inputs.
pub(crate) fn attach_mask(mask: MaskInput, names: &mut Vec<String>, streams: &mut Vec<DocStream>) -> (MaskSlot, Option<String>) {
    let (slot, stream, parent) = MaskSlot::from_input(mask, streams.len() - 1);
    if let Some(stream) = stream {
        names.push(MASK_FIELD.to_string());
        streams.push(stream);
    }
    (slot, parent)
}
