//! Fixed-order execution of an [`EditSpec`] against an image engine.
//!
//! Execution is split in two:
//!
//! 1. [`plan`] turns the [`EditSpec`] into an ordered list of [`Step`]s. This is where
//!    string-valued fields (fit, colours, channels, operators) are parsed,
//!    where structured fields are shape-checked, and where alpha gating
//!    against the source metadata happens. The order is fixed:
//!
//!    ```text
//!    resize     crop-before, resize, crop-after, extend, trim
//!    operations rotate, flip, flop, affine, sharpen, median, blur, flatten,
//!               gamma, negate, normalize, clahe, convolve, threshold,
//!               boolean, linear, recomb, modulate
//!    color      tint, grayscale, pipeline colourspace, colourspace
//!    channel    remove-alpha, ensure-alpha, extract, join, band-bool
//!    compositing watermark
//!    ```
//!
//! 2. [`PipelineExecutor::execute`] applies the steps in order, fetching
//!    secondary images as needed, and encodes. The first failure aborts the
//!    request; nothing is encoded after a failed step.

use crate::edits::EditSpec;
use crate::fetch::{AssetError, AssetStore, FetchError, SecondaryFetcher};
use crate::imaging::params::parse_channel;
use crate::imaging::{
    AffineParams, Anchor, BackendError, BooleanOperator, ClaheParams, Color, Colourspace,
    ConvolveKernel, EncoderOptions, ExtendParams, Fit, Format, ImageBackend, ImageEngine,
    Interpolator, Kernel, ModulateParams, Region, ResizeParams, SharpenParams, SourceMetadata,
};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid {step} argument: {reason}")]
    InvalidArgument { step: &'static str, reason: String },
    #[error("{step} failed: {source}")]
    Engine {
        step: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("failed to fetch secondary image '{reference}': {source}")]
    Fetch {
        reference: String,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl PipelineError {
    fn invalid(step: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            step,
            reason: reason.into(),
        }
    }
}

/// One engine invocation with fully parsed arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CropBefore(Region),
    Resize(ResizeParams),
    CropAfter(Region),
    Extend(ExtendParams),
    Trim(u32),
    Rotate { degrees: i64, background: Color },
    Flip,
    Flop,
    Affine(AffineParams),
    Sharpen(SharpenParams),
    Median(u32),
    Blur(f64),
    Flatten(Color),
    Gamma { gamma: f64, gamma_out: Option<f64> },
    Negate { alpha: bool },
    Normalize,
    Clahe(ClaheParams),
    Convolve(ConvolveKernel),
    Threshold(u32),
    Boolean { operator: BooleanOperator, source: String },
    Linear { a: f64, b: f64 },
    Recomb([[f64; 3]; 3]),
    Modulate(ModulateParams),
    Tint(Color),
    Grayscale,
    PipelineColourspace(Colourspace),
    Colourspace(Colourspace),
    RemoveAlpha,
    EnsureAlpha(f64),
    ExtractChannel(usize),
    JoinChannels(Vec<String>),
    BandBool(BooleanOperator),
    Watermark { name: String, gravity: Anchor },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::CropBefore(_) => "crop_before",
            Step::Resize(_) => "resize",
            Step::CropAfter(_) => "crop_after",
            Step::Extend(_) => "extend",
            Step::Trim(_) => "trim",
            Step::Rotate { .. } => "rotate",
            Step::Flip => "flip",
            Step::Flop => "flop",
            Step::Affine(_) => "affine",
            Step::Sharpen(_) => "sharpen",
            Step::Median(_) => "median",
            Step::Blur(_) => "blur",
            Step::Flatten(_) => "flatten",
            Step::Gamma { .. } => "gamma",
            Step::Negate { .. } => "negate",
            Step::Normalize => "normalize",
            Step::Clahe(_) => "clahe",
            Step::Convolve(_) => "convolve",
            Step::Threshold(_) => "threshold",
            Step::Boolean { .. } => "boolean",
            Step::Linear { .. } => "linear",
            Step::Recomb(_) => "recomb",
            Step::Modulate(_) => "modulate",
            Step::Tint(_) => "tint",
            Step::Grayscale => "grayscale",
            Step::PipelineColourspace(_) => "pipeline_colourspace",
            Step::Colourspace(_) => "colourspace",
            Step::RemoveAlpha => "remove_alpha",
            Step::EnsureAlpha(_) => "ensure_alpha",
            Step::ExtractChannel(_) => "extract_channel",
            Step::JoinChannels(_) => "join_channels",
            Step::BandBool(_) => "band_bool",
            Step::Watermark { .. } => "watermark",
        }
    }
}

fn parse<T: FromStr<Err = String>>(
    step: &'static str,
    value: Option<&str>,
) -> Result<Option<T>, PipelineError> {
    value
        .map(|v| v.parse::<T>().map_err(|reason| PipelineError::invalid(step, reason)))
        .transpose()
}

fn parse_or_default<T: FromStr<Err = String> + Default>(
    step: &'static str,
    value: Option<&str>,
) -> Result<T, PipelineError> {
    Ok(parse(step, value)?.unwrap_or_default())
}

/// Crops that would leave nothing to encode are refused up front.
fn non_empty(step: &'static str, region: Region) -> Result<Region, PipelineError> {
    if region.width == 0 || region.height == 0 {
        return Err(PipelineError::invalid(
            step,
            format!("region {}x{} has no area", region.width, region.height),
        ));
    }
    Ok(region)
}

/// Materialise the fixed step order for `spec`.
pub fn plan(spec: &EditSpec, metadata: &SourceMetadata) -> Result<Vec<Step>, PipelineError> {
    let mut steps = Vec::new();
    let resize = &spec.resize;
    let background: Color = parse_or_default("resize", resize.background.as_deref())?;

    if let Some(region) = resize.crop_before {
        steps.push(Step::CropBefore(non_empty("crop_before", region)?));
    }
    if resize.width.is_some() || resize.height.is_some() {
        if resize.width == Some(0) || resize.height == Some(0) {
            return Err(PipelineError::invalid(
                "resize",
                "width and height must be positive",
            ));
        }
        steps.push(Step::Resize(ResizeParams {
            width: resize.width,
            height: resize.height,
            fit: parse_or_default::<Fit>("resize", resize.fit.as_deref())?,
            position: parse_or_default::<Anchor>("resize", resize.position.as_deref())?,
            background,
            kernel: parse_or_default::<Kernel>("resize", resize.kernel.as_deref())?,
        }));
    }
    if let Some(region) = resize.crop_after {
        steps.push(Step::CropAfter(non_empty("crop_after", region)?));
    }
    if let Some(extend) = &resize.extend {
        steps.push(Step::Extend(ExtendParams {
            top: extend.top,
            bottom: extend.bottom,
            left: extend.left,
            right: extend.right,
            background: parse("extend", extend.background.as_deref())?.unwrap_or(background),
        }));
    }
    if let Some(threshold) = resize.trim {
        steps.push(Step::Trim(threshold));
    }

    plan_operations(spec, background, &mut steps)?;

    let color = &spec.color;
    if let Some(tint) = color.tint {
        steps.push(Step::Tint(Color::rgb(tint.r, tint.g, tint.b)));
    }
    if color.grayscale {
        steps.push(Step::Grayscale);
    }
    if let Some(space) = parse("pipeline_colourspace", color.pipeline_colourspace.as_deref())? {
        steps.push(Step::PipelineColourspace(space));
    }
    if let Some(space) = parse("colourspace", color.colourspace.as_deref())? {
        steps.push(Step::Colourspace(space));
    }

    let channel = &spec.channel;
    if channel.remove_alpha {
        if metadata.has_alpha {
            steps.push(Step::RemoveAlpha);
        } else {
            log::debug!("skipping remove_alpha: source has no alpha channel");
        }
    }
    if let Some(alpha) = channel.ensure_alpha {
        if metadata.has_alpha {
            log::debug!("skipping ensure_alpha: source already has an alpha channel");
        } else {
            steps.push(Step::EnsureAlpha(alpha));
        }
    }
    if let Some(selector) = &channel.extract_channel {
        let index =
            parse_channel(selector).map_err(|r| PipelineError::invalid("extract_channel", r))?;
        steps.push(Step::ExtractChannel(index));
    }
    if let Some(references) = &channel.join_channels {
        if !references.is_empty() {
            steps.push(Step::JoinChannels(references.clone()));
        }
    }
    if let Some(operator) = parse("band_bool", channel.band_bool.as_deref())? {
        steps.push(Step::BandBool(operator));
    }

    if let Some(name) = &spec.compositing.watermark {
        steps.push(Step::Watermark {
            name: name.clone(),
            gravity: parse_or_default("watermark", Some(spec.compositing.gravity.as_str()))?,
        });
    }

    Ok(steps)
}

fn plan_operations(
    spec: &EditSpec,
    background: Color,
    steps: &mut Vec<Step>,
) -> Result<(), PipelineError> {
    let ops = &spec.operations;

    if let Some(degrees) = ops.rotate {
        steps.push(Step::Rotate {
            degrees,
            background,
        });
    }
    if ops.flip {
        steps.push(Step::Flip);
    }
    if ops.flop {
        steps.push(Step::Flop);
    }
    if let Some(values) = &ops.affine {
        let matrix: [f64; 4] = values.as_slice().try_into().map_err(|_| {
            PipelineError::invalid(
                "affine",
                format!("matrix needs 4 values, got {}", values.len()),
            )
        })?;
        steps.push(Step::Affine(AffineParams {
            matrix,
            background: parse_or_default("affine", Some(ops.affine_background.as_str()))?,
            interpolator: parse_or_default::<Interpolator>(
                "affine",
                Some(ops.affine_interpolator.as_str()),
            )?,
        }));
    }
    if let Some(params) = ops.sharpen {
        steps.push(Step::Sharpen(params));
    }
    if let Some(size) = ops.median {
        steps.push(Step::Median(size));
    }
    if let Some(sigma) = ops.blur {
        steps.push(Step::Blur(sigma));
    }
    if let Some(color) = parse("flatten", ops.flatten.as_deref())? {
        steps.push(Step::Flatten(color));
    }
    if let Some(values) = &ops.gamma {
        match values.as_slice() {
            [gamma] => steps.push(Step::Gamma {
                gamma: *gamma,
                gamma_out: None,
            }),
            [gamma, gamma_out] => steps.push(Step::Gamma {
                gamma: *gamma,
                gamma_out: Some(*gamma_out),
            }),
            other => {
                return Err(PipelineError::invalid(
                    "gamma",
                    format!("expected 1 or 2 values, got {}", other.len()),
                ));
            }
        }
    }
    if ops.negate {
        steps.push(Step::Negate { alpha: true });
    }
    if ops.normalize {
        steps.push(Step::Normalize);
    }
    if let Some(params) = ops.clahe {
        steps.push(Step::Clahe(params));
    }
    if let Some(kernel) = &ops.convolve {
        steps.push(Step::Convolve(kernel.clone()));
    }
    if let Some(level) = ops.threshold {
        steps.push(Step::Threshold(level));
    }
    if let Some(request) = &ops.boolean {
        steps.push(Step::Boolean {
            operator: request
                .operator
                .parse()
                .map_err(|r| PipelineError::invalid("boolean", r))?,
            source: request.source.clone(),
        });
    }
    if let Some(values) = &ops.linear {
        let [a, b] = values.as_slice() else {
            return Err(PipelineError::invalid(
                "linear",
                format!("expected 2 values, got {}", values.len()),
            ));
        };
        steps.push(Step::Linear { a: *a, b: *b });
    }
    if let Some(rows) = &ops.recomb {
        let mut matrix = [[0.0; 3]; 3];
        let square = rows.len() == 3 && rows.iter().all(|row| row.len() == 3);
        if !square {
            return Err(PipelineError::invalid("recomb", "matrix must be 3x3"));
        }
        for (target, row) in matrix.iter_mut().zip(rows) {
            target.copy_from_slice(row);
        }
        steps.push(Step::Recomb(matrix));
    }
    if let Some(params) = ops.modulate {
        steps.push(Step::Modulate(params));
    }
    Ok(())
}

/// Pipeline lifecycle, logged at trace level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Built,
    Applying,
    Encoded,
    Consumed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Built => "built",
            State::Applying => "applying",
            State::Encoded => "encoded",
            State::Consumed => "consumed",
        };
        f.write_str(name)
    }
}

/// What the caller gets back: the encoded bytes plus response metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResultMetadata {
    pub content_length: usize,
    pub content_type: &'static str,
    pub format: Format,
    pub width: u32,
    pub height: u32,
}

/// Runs planned steps against one engine handle per request.
pub struct PipelineExecutor<'a, B: ImageBackend> {
    backend: &'a B,
    fetcher: &'a dyn SecondaryFetcher,
    assets: &'a AssetStore,
}

impl<'a, B: ImageBackend> PipelineExecutor<'a, B> {
    pub fn new(backend: &'a B, fetcher: &'a dyn SecondaryFetcher, assets: &'a AssetStore) -> Self {
        Self {
            backend,
            fetcher,
            assets,
        }
    }

    /// Apply `spec` to `image` and encode. Consumes both.
    pub fn execute(
        &self,
        mut image: B::Image,
        spec: EditSpec,
        options: &EncoderOptions,
        metadata: &SourceMetadata,
    ) -> Result<ProcessedImage, PipelineError> {
        let mut state = State::Built;
        let steps = plan(&spec, metadata)?;
        log::debug!("{} step(s) planned, output {}", steps.len(), spec.output.format);

        transition(&mut state, State::Applying);
        for step in steps {
            self.apply(&mut image, step)?;
        }

        let encoded = image
            .encode(spec.output.format, options)
            .map_err(|source| PipelineError::Engine {
                step: "encode",
                source,
            })?;
        transition(&mut state, State::Encoded);

        let processed = ProcessedImage {
            metadata: ResultMetadata {
                content_length: encoded.bytes.len(),
                content_type: encoded.format.mime_type(),
                format: encoded.format,
                width: encoded.width,
                height: encoded.height,
            },
            bytes: encoded.bytes,
        };
        transition(&mut state, State::Consumed);
        Ok(processed)
    }

    fn apply(&self, image: &mut B::Image, step: Step) -> Result<(), PipelineError> {
        let name = step.name();
        log::debug!("applying {name}");
        let engine = |source| PipelineError::Engine { step: name, source };

        match step {
            Step::CropBefore(region) | Step::CropAfter(region) => image.crop(region),
            Step::Resize(params) => image.resize(&params),
            Step::Extend(params) => image.extend(&params),
            Step::Trim(threshold) => image.trim(threshold),
            Step::Rotate {
                degrees,
                background,
            } => image.rotate(degrees, background),
            Step::Flip => image.flip(),
            Step::Flop => image.flop(),
            Step::Affine(params) => image.affine(&params),
            Step::Sharpen(params) => image.sharpen(&params),
            Step::Median(size) => image.median(size),
            Step::Blur(sigma) => image.blur(sigma),
            Step::Flatten(color) => image.flatten(color),
            Step::Gamma { gamma, gamma_out } => image.gamma(gamma, gamma_out),
            Step::Negate { alpha } => image.negate(alpha),
            Step::Normalize => image.normalize(),
            Step::Clahe(params) => image.clahe(&params),
            Step::Convolve(kernel) => image.convolve(&kernel),
            Step::Threshold(level) => image.threshold(level),
            Step::Boolean { operator, source } => {
                let operand = self.fetch_image(name, &source)?;
                image.boolean(&operand, operator)
            }
            Step::Linear { a, b } => image.linear(a, b),
            Step::Recomb(matrix) => image.recomb(&matrix),
            Step::Modulate(params) => image.modulate(&params),
            Step::Tint(color) => image.tint(color),
            Step::Grayscale => image.grayscale(),
            Step::PipelineColourspace(space) => image.pipeline_colourspace(space),
            Step::Colourspace(space) => image.to_colourspace(space),
            Step::RemoveAlpha => image.remove_alpha(),
            Step::EnsureAlpha(alpha) => image.ensure_alpha(alpha),
            Step::ExtractChannel(channel) => image.extract_channel(channel),
            Step::JoinChannels(references) => {
                // Fetched concurrently; collect keeps request order.
                let others = references
                    .par_iter()
                    .map(|reference| self.fetch_image(name, reference))
                    .collect::<Result<Vec<_>, _>>()?;
                image.join_channels(&others)
            }
            Step::BandBool(operator) => image.band_bool(operator),
            Step::Watermark {
                name: asset,
                gravity,
            } => {
                let bytes = self.assets.load(&asset)?;
                let overlay = self.backend.decode(&bytes).map_err(engine)?;
                image.composite(&overlay, gravity)
            }
        }
        .map_err(engine)
    }

    fn fetch_image(&self, step: &'static str, reference: &str) -> Result<B::Image, PipelineError> {
        let bytes = self
            .fetcher
            .fetch(reference)
            .map_err(|source| PipelineError::Fetch {
                reference: reference.to_string(),
                source,
            })?;
        self.backend
            .decode(&bytes)
            .map_err(|source| PipelineError::Engine { step, source })
    }
}

fn transition(state: &mut State, next: State) {
    log::trace!("pipeline {state} -> {next}");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edits::{BooleanRequest, EditSpecBuilder, RawParams};
    use crate::imaging::FormatFlags;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp, metadata};
    use crate::test_helpers::RecordingFetcher;
    use tempfile::TempDir;

    fn spec_for(query: &str, meta: &SourceMetadata) -> EditSpec {
        EditSpecBuilder::new(EditSpec::default(), Format::ALL.to_vec())
            .build(&RawParams::from_query(query), meta)
    }

    fn options() -> EncoderOptions {
        EncoderOptions {
            quality: crate::imaging::Quality(70),
            effort: 1,
            flags: FormatFlags::None,
        }
    }

    fn run(
        backend: &MockBackend,
        fetcher: &RecordingFetcher,
        query: &str,
    ) -> Result<ProcessedImage, PipelineError> {
        let meta = backend.metadata;
        let spec = spec_for(query, &meta);
        let assets = AssetStore::new("/nonexistent");
        let image = backend.decode(b"source").unwrap();
        PipelineExecutor::new(backend, fetcher, &assets).execute(image, spec, &options(), &meta)
    }

    fn names(steps: &[Step]) -> Vec<&'static str> {
        steps.iter().map(Step::name).collect()
    }

    #[test]
    fn plan_follows_fixed_cross_domain_order() {
        let meta = metadata(Format::Png, true);
        // Parameters deliberately listed out of order.
        let spec = spec_for(
            "wm=logo.png&bb=and&ra=1&g=1&mo={}&bl=2&flop=1&r=90&tr=10&w=100&cb={\"width\":5,\"height\":5}&ex={\"top\":1}&nr=1",
            &meta,
        );
        let steps = plan(&spec, &meta).unwrap();
        assert_eq!(
            names(&steps),
            vec![
                "crop_before",
                "resize",
                "extend",
                "trim",
                "rotate",
                "flop",
                "blur",
                "normalize",
                "modulate",
                "grayscale",
                "remove_alpha",
                "band_bool",
                "watermark",
            ]
        );
    }

    #[test]
    fn empty_spec_plans_nothing() {
        let meta = metadata(Format::Jpeg, false);
        assert!(plan(&spec_for("", &meta), &meta).unwrap().is_empty());
    }

    #[test]
    fn resize_only_when_a_dimension_is_set() {
        let meta = metadata(Format::Jpeg, false);
        let steps = plan(&spec_for("f=contain&k=nearest", &meta), &meta).unwrap();
        assert!(steps.is_empty());

        let steps = plan(&spec_for("h=300&f=contain&bg=white", &meta), &meta).unwrap();
        assert_eq!(
            steps,
            vec![Step::Resize(ResizeParams {
                width: None,
                height: Some(300),
                fit: Fit::Contain,
                position: Anchor::Center,
                background: Color::WHITE,
                kernel: Kernel::Lanczos3,
            })]
        );
    }

    #[test]
    fn alpha_gating() {
        let opaque = metadata(Format::Jpeg, false);
        let steps = plan(&spec_for("ra=1&ea=0.5", &opaque), &opaque).unwrap();
        assert_eq!(steps, vec![Step::EnsureAlpha(0.5)]);

        let translucent = metadata(Format::Png, true);
        let steps = plan(&spec_for("ra=1&ea=0.5", &translucent), &translucent).unwrap();
        assert_eq!(steps, vec![Step::RemoveAlpha]);
    }

    #[test]
    fn affine_uses_template_background_and_interpolator() {
        let meta = metadata(Format::Jpeg, false);
        let steps = plan(&spec_for("af=[1,0,0,1]", &meta), &meta).unwrap();
        assert_eq!(
            steps,
            vec![Step::Affine(AffineParams {
                matrix: [1.0, 0.0, 0.0, 1.0],
                background: Color::BLACK,
                interpolator: Interpolator::Bicubic,
            })]
        );
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        let meta = metadata(Format::Jpeg, false);
        for query in ["af=[1,2,3]", "af=oops", "gm=[]", "li=[1]", "rc=[[1,0,0],[0,1,0]]"] {
            let err = plan(&spec_for(query, &meta), &meta).unwrap_err();
            assert!(
                matches!(err, PipelineError::InvalidArgument { .. }),
                "{query}: {err}"
            );
        }
    }

    #[test]
    fn zero_area_outputs_are_rejected() {
        let meta = metadata(Format::Png, false);
        for query in [
            "w=0&h=0",
            "w=0",
            "h=0&f=contain",
            r#"cb={"left":0,"top":0,"width":0,"height":10}"#,
            r#"ca={"left":0,"top":0,"width":10,"height":0}"#,
        ] {
            let err = plan(&spec_for(query, &meta), &meta).unwrap_err();
            assert!(
                matches!(err, PipelineError::InvalidArgument { .. }),
                "{query}: {err}"
            );
        }
    }

    #[test]
    fn unknown_vocabulary_is_rejected() {
        let meta = metadata(Format::Jpeg, false);
        for query in ["w=10&f=squash", "fl=notacolour", "ec=purple", "bb=nand", "wm=a.png&gr=up"] {
            assert!(plan(&spec_for(query, &meta), &meta).is_err(), "{query}");
        }
    }

    #[test]
    fn executes_in_order_and_encodes_last() {
        let backend = MockBackend::new(metadata(Format::Jpeg, false));
        let fetcher = RecordingFetcher::default();
        let processed = run(&backend, &fetcher, "w=800&h=600&r=-90&flip=1&fm=webp").unwrap();

        assert_eq!(
            backend.applied(),
            vec![
                RecordedOp::Resize {
                    width: Some(800),
                    height: Some(600)
                },
                RecordedOp::Rotate(-90),
                RecordedOp::Op("flip"),
                RecordedOp::Encode {
                    format: Format::Webp,
                    quality: 70,
                    flags: FormatFlags::None
                },
            ]
        );
        assert_eq!(processed.bytes, b"source.webp");
        assert_eq!(processed.metadata.content_type, "image/webp");
        assert_eq!(processed.metadata.content_length, 11);
    }

    #[test]
    fn boolean_operand_is_fetched_before_combining() {
        let backend = MockBackend::new(metadata(Format::Jpeg, false));
        let fetcher = RecordingFetcher::default();
        run(
            &backend,
            &fetcher,
            "bo={\"operator\":\"eor\",\"source\":\"https://cdn/mask.png\"}",
        )
        .unwrap();

        assert_eq!(fetcher.references(), vec!["https://cdn/mask.png"]);
        assert_eq!(
            backend.applied()[0],
            RecordedOp::Boolean {
                operand: "https://cdn/mask.png".into(),
                operator: BooleanOperator::Eor
            }
        );
    }

    #[test]
    fn join_channels_preserve_request_order() {
        let backend = MockBackend::new(metadata(Format::Jpeg, false));
        let fetcher = RecordingFetcher::default();
        run(&backend, &fetcher, "jc=[\"c.png\",\"a.png\",\"b.png\"]").unwrap();

        assert_eq!(
            backend.applied()[0],
            RecordedOp::JoinChannels(vec!["c.png".into(), "a.png".into(), "b.png".into()])
        );
    }

    #[test]
    fn failed_join_fetch_aborts_without_encoding() {
        let backend = MockBackend::new(metadata(Format::Jpeg, false));
        let fetcher = RecordingFetcher::failing_on("b.png");
        let err = run(&backend, &fetcher, "w=10&jc=[\"a.png\",\"b.png\"]").unwrap_err();

        assert!(
            matches!(&err, PipelineError::Fetch { reference, .. } if reference == "b.png"),
            "{err}"
        );
        let applied = backend.applied();
        assert!(!applied.iter().any(|op| matches!(op, RecordedOp::Encode { .. })));
        assert!(!applied.iter().any(|op| matches!(op, RecordedOp::JoinChannels(_))));
    }

    #[test]
    fn empty_boolean_source_is_a_fetch_error() {
        let backend = MockBackend::new(metadata(Format::Jpeg, false));
        let spec = EditSpec {
            operations: crate::edits::OperationEdits {
                boolean: Some(BooleanRequest {
                    operator: "and".into(),
                    source: String::new(),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let fetcher = crate::fetch::RoutingFetcher::new(
            RecordingFetcher::default(),
            RecordingFetcher::default(),
        );
        let assets = AssetStore::new("/nonexistent");
        let image = backend.decode(b"source").unwrap();
        let err = PipelineExecutor::new(&backend, &fetcher, &assets)
            .execute(image, spec, &options(), &backend.metadata)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Fetch {
                source: FetchError::EmptyReference,
                ..
            }
        ));
    }

    #[test]
    fn engine_rejection_aborts_pipeline() {
        let backend = MockBackend::rejecting(metadata(Format::Jpeg, false), "affine");
        let fetcher = RecordingFetcher::default();
        let err = run(&backend, &fetcher, "af=[1,0,0,1]&g=1").unwrap_err();

        assert!(matches!(err, PipelineError::Engine { step: "affine", .. }));
        assert!(backend.applied().is_empty());
    }

    #[test]
    fn corrupt_secondary_image_is_an_engine_error() {
        let backend = MockBackend::new(metadata(Format::Jpeg, false));
        let fetcher = RecordingFetcher::default();
        let err = run(
            &backend,
            &fetcher,
            "bo={\"operator\":\"and\",\"source\":\"corrupt\"}",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Engine {
                step: "boolean",
                source: BackendError::Decode(_)
            }
        ));
    }

    #[test]
    fn watermark_is_loaded_from_assets() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("logo.png"), b"logo").unwrap();
        let assets = AssetStore::new(tmp.path());
        let backend = MockBackend::new(metadata(Format::Jpeg, false));
        let meta = backend.metadata;
        let spec = spec_for("wm=logo.png", &meta);
        let image = backend.decode(b"source").unwrap();

        PipelineExecutor::new(&backend, &RecordingFetcher::default(), &assets)
            .execute(image, spec, &options(), &meta)
            .unwrap();
        assert_eq!(
            backend.applied()[0],
            RecordedOp::Composite {
                overlay: "logo".into(),
                gravity: Anchor::SouthEast
            }
        );
    }

    #[test]
    fn missing_watermark_is_an_asset_error() {
        let backend = MockBackend::new(metadata(Format::Jpeg, false));
        let err = run(&backend, &RecordingFetcher::default(), "wm=../secret").unwrap_err();
        assert!(matches!(err, PipelineError::Asset(AssetError::InvalidName(_))));
    }
}
