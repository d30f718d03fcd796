//! Raw parameters + source metadata → [`EditSpec`].

use super::coerce::{Coerced, coerce};
use super::param::{ParamName, RawParams};
use super::spec::EditSpec;
use crate::imaging::{Format, SourceMetadata};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Builds per-request edit specs from an immutable defaults template.
#[derive(Debug, Clone)]
pub struct EditSpecBuilder {
    defaults: EditSpec,
    supported_formats: Vec<Format>,
}

impl EditSpecBuilder {
    pub fn new(defaults: EditSpec, supported_formats: Vec<Format>) -> Self {
        Self {
            defaults,
            supported_formats,
        }
    }

    pub fn defaults(&self) -> &EditSpec {
        &self.defaults
    }

    pub fn supported_formats(&self) -> &[Format] {
        &self.supported_formats
    }

    /// Overlay `raw` on a copy of the defaults.
    ///
    /// Never fails: unparseable values fall back to their default, and an
    /// absent or unsupported `fm` falls back to the source format.
    pub fn build(&self, raw: &RawParams, metadata: &SourceMetadata) -> EditSpec {
        let mut spec = self.defaults.clone();
        let mut requested_format = None;

        for (name, value) in raw.iter() {
            let coerced = coerce(value, name.kind(), name.allows_negative());
            if name == ParamName::Format {
                requested_format = coerced.text().and_then(|s| s.parse::<Format>().ok());
                continue;
            }
            apply(&mut spec, name, coerced);
        }

        spec.output.format = match requested_format {
            Some(format) if self.supported_formats.contains(&format) => format,
            requested => {
                if raw.get(ParamName::Format).is_some() {
                    log::debug!(
                        "format {requested:?} not supported, keeping source format {}",
                        metadata.format
                    );
                }
                metadata.format
            }
        };
        spec
    }
}

/// Typed decode of a structured value, falling back to `T::default()`.
fn decode<T: DeserializeOwned + Default>(name: ParamName, value: Option<Value>) -> T {
    let Some(value) = value else {
        return T::default();
    };
    serde_json::from_value(value).unwrap_or_else(|e| {
        log::debug!("parameter '{name}' did not decode ({e}), using default");
        T::default()
    })
}

/// Keep the default when coercion left the value unset.
fn set<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn apply(spec: &mut EditSpec, name: ParamName, value: Coerced) {
    let resize = &mut spec.resize;
    let ops = &mut spec.operations;
    let color = &mut spec.color;
    let channel = &mut spec.channel;

    match name {
        ParamName::Width => set(&mut resize.width, value.unsigned()),
        ParamName::Height => set(&mut resize.height, value.unsigned()),
        ParamName::Fit => set(&mut resize.fit, value.text()),
        ParamName::Position => set(&mut resize.position, value.text()),
        ParamName::Background => set(&mut resize.background, value.text()),
        ParamName::Kernel => set(&mut resize.kernel, value.text()),
        ParamName::CropBefore => resize.crop_before = Some(decode(name, value.structured())),
        ParamName::CropAfter => resize.crop_after = Some(decode(name, value.structured())),
        ParamName::Extend => resize.extend = Some(decode(name, value.structured())),
        ParamName::Trim => set(&mut resize.trim, value.unsigned()),

        ParamName::Rotate => set(&mut ops.rotate, value.integer()),
        ParamName::Flip => ops.flip = value.flag(),
        ParamName::Flop => ops.flop = value.flag(),
        ParamName::Affine => ops.affine = Some(decode(name, value.structured())),
        ParamName::AffineBackground => {
            if let Some(text) = value.text() {
                ops.affine_background = text;
            }
        }
        ParamName::AffineInterpolator => {
            if let Some(text) = value.text() {
                ops.affine_interpolator = text;
            }
        }
        ParamName::Sharpen => ops.sharpen = Some(decode(name, value.structured())),
        ParamName::Median => set(&mut ops.median, value.unsigned()),
        ParamName::Blur => set(&mut ops.blur, value.float()),
        ParamName::Flatten => set(&mut ops.flatten, value.text()),
        ParamName::Gamma => ops.gamma = Some(decode(name, value.structured())),
        ParamName::Negate => ops.negate = value.flag(),
        ParamName::Normalize => ops.normalize = value.flag(),
        ParamName::Clahe => ops.clahe = Some(decode(name, value.structured())),
        ParamName::Convolve => ops.convolve = Some(decode(name, value.structured())),
        ParamName::Threshold => set(&mut ops.threshold, value.unsigned()),
        ParamName::Boolean => ops.boolean = Some(decode(name, value.structured())),
        ParamName::Linear => ops.linear = Some(decode(name, value.structured())),
        ParamName::Recomb => ops.recomb = Some(decode(name, value.structured())),
        ParamName::Modulate => ops.modulate = Some(decode(name, value.structured())),

        ParamName::Tint => color.tint = Some(decode(name, value.structured())),
        ParamName::Grayscale => color.grayscale = value.flag(),
        ParamName::PipelineColourspace => set(&mut color.pipeline_colourspace, value.text()),
        ParamName::Colourspace => set(&mut color.colourspace, value.text()),

        ParamName::RemoveAlpha => channel.remove_alpha = value.flag(),
        ParamName::EnsureAlpha => set(&mut channel.ensure_alpha, value.float()),
        ParamName::ExtractChannel => set(&mut channel.extract_channel, value.text()),
        ParamName::JoinChannels => {
            channel.join_channels = Some(decode(name, value.structured()))
        }
        ParamName::BandBool => set(&mut channel.band_bool, value.text()),

        ParamName::Watermark => set(&mut spec.compositing.watermark, value.text()),
        ParamName::Gravity => {
            if let Some(text) = value.text() {
                spec.compositing.gravity = text;
            }
        }

        // Resolved against the allow-list by the caller.
        ParamName::Format => {}
        ParamName::Quality => set(&mut spec.output.quality, value.unsigned()),
        ParamName::Lossless => spec.output.lossless = value.flag(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edits::spec::BooleanRequest;
    use crate::imaging::backend::tests::metadata;
    use crate::imaging::{Region, SharpenParams};

    fn builder() -> EditSpecBuilder {
        EditSpecBuilder::new(
            EditSpec::default(),
            vec![Format::Jpeg, Format::Png, Format::Webp, Format::Avif],
        )
    }

    fn build(query: &str) -> EditSpec {
        builder().build(&RawParams::from_query(query), &metadata(Format::Jpeg, false))
    }

    #[test]
    fn empty_params_copy_defaults_and_source_format() {
        let spec = builder().build(&RawParams::new(), &metadata(Format::Png, true));
        let expected = EditSpec {
            output: crate::edits::OutputEdits {
                format: Format::Png,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(spec, expected);
    }

    #[test]
    fn build_is_pure() {
        let builder = builder();
        let before = builder.defaults().clone();
        let raw = RawParams::from_query("w=300&r=90&gr=north&afbg=%23fff&flip=1");
        let meta = metadata(Format::Jpeg, false);

        let first = builder.build(&raw, &meta);
        let second = builder.build(&raw, &meta);
        assert_eq!(first, second);
        assert_eq!(builder.defaults(), &before);

        let untouched = builder.build(&RawParams::new(), &meta);
        assert_eq!(untouched.compositing.gravity, "southeast");
        assert_eq!(untouched.operations.affine_background, "#000000");
        assert!(!untouched.operations.flip);
    }

    #[test]
    fn format_falls_back_to_source() {
        assert_eq!(build("fm=bogus").output.format, Format::Jpeg);
        assert_eq!(build("fm=tiff").output.format, Format::Jpeg, "not in allow-list");
        assert_eq!(build("fm=webp").output.format, Format::Webp);
    }

    #[test]
    fn negative_policy() {
        let spec = build("w=-5&h=-1&r=-90&q=-10&bl=-2&md=-3");
        assert_eq!(spec.resize.width, None);
        assert_eq!(spec.resize.height, None);
        assert_eq!(spec.operations.rotate, Some(-90));
        assert_eq!(spec.output.quality, None);
        assert_eq!(spec.operations.blur, None);
        assert_eq!(spec.operations.median, None);
    }

    #[test]
    fn end_to_end_scenario_params() {
        let spec = build("w=800&h=600&fm=webp&q=90&ll=1");
        assert_eq!(spec.resize.width, Some(800));
        assert_eq!(spec.resize.height, Some(600));
        assert_eq!(spec.output.format, Format::Webp);
        assert_eq!(spec.output.quality, Some(90));
        assert!(spec.output.lossless);
    }

    #[test]
    fn structured_fields_decode_or_default() {
        let spec = build(
            "af=[1,0.2,0,1]&sh={\"sigma\":2}&cb={\"left\":1,\"width\":5,\"height\":4}&gm=[2.2]",
        );
        assert_eq!(spec.operations.affine, Some(vec![1.0, 0.2, 0.0, 1.0]));
        assert_eq!(
            spec.operations.sharpen,
            Some(SharpenParams {
                sigma: Some(2.0),
                threshold: 0
            })
        );
        assert_eq!(
            spec.resize.crop_before,
            Some(Region {
                left: 1,
                top: 0,
                width: 5,
                height: 4
            })
        );
        assert_eq!(spec.operations.gamma, Some(vec![2.2]));

        let broken = build("af=[1,0&sh=nope&gm=[\"x\"]&bo={\"operator\":5}");
        assert_eq!(broken.operations.affine, Some(vec![]));
        assert_eq!(broken.operations.sharpen, Some(SharpenParams::default()));
        assert_eq!(broken.operations.gamma, Some(vec![]));
        assert_eq!(broken.operations.boolean, Some(BooleanRequest::default()));
    }

    #[test]
    fn secondary_references_are_stored_unresolved() {
        let spec = build(
            "bo={\"operator\":\"and\",\"source\":\"https://cdn/x.png\"}&jc=[\"a.png\",\"b.png\"]",
        );
        assert_eq!(
            spec.operations.boolean,
            Some(BooleanRequest {
                operator: "and".into(),
                source: "https://cdn/x.png".into()
            })
        );
        assert_eq!(
            spec.channel.join_channels,
            Some(vec!["a.png".to_string(), "b.png".to_string()])
        );
    }

    #[test]
    fn booleans_and_text_fields() {
        let spec = build("flip=true&flop=yes&ng=1&ra=2&g=TRUE&wm=logo.png&gr=northwest&ec=red");
        assert!(spec.operations.flip);
        assert!(!spec.operations.flop);
        assert!(spec.operations.negate);
        assert!(!spec.channel.remove_alpha);
        assert!(spec.color.grayscale);
        assert_eq!(spec.compositing.watermark.as_deref(), Some("logo.png"));
        assert_eq!(spec.compositing.gravity, "northwest");
        assert_eq!(spec.channel.extract_channel.as_deref(), Some("red"));
    }

    #[test]
    fn zero_is_a_value_not_unset() {
        let spec = build("r=0&th=0");
        assert_eq!(spec.operations.rotate, Some(0));
        assert_eq!(spec.operations.threshold, Some(0));
    }
}
