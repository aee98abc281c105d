//! Prompt templating.
//!
//! The caller marks the image inside the raw question with a doubled-brace
//! delimiter (`{{path/to/image.jpg}}`). We extract the path, swap the
//! delimiter for the backend's embedded-image marker, and wrap everything in
//! the instruction framing the language model was tuned on.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::PipelineError;
use crate::types::Request;

/// Marker the generation backend substitutes the image embedding for.
pub const IMAGE_PLACEHOLDER: &str = "<image_id>0</image_id><image>\n";

lazy_static! {
    static ref IMAGE_REF: Regex = Regex::new(r"\{\{(.+?)\}\}").unwrap();
}

/// Turn raw caller input into a routable request.
///
/// Rejects input without an image delimiter before any worker involvement.
pub fn build_request(raw: &str) -> Result<Request, PipelineError> {
    let caps = IMAGE_REF
        .captures(raw)
        .ok_or(PipelineError::MissingImageDelimiter)?;
    let full_match = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
    let image = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

    let body = raw.replacen(full_match, IMAGE_PLACEHOLDER, 1);
    let prompt = format!(
        "<|im_start|>system\nYou are a helpful assistant.<|im_end|>\n<|im_start|>user\n{body}<|im_end|>\n<|im_start|>assistant\n"
    );

    Ok(Request { prompt, image: image.into() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_missing_delimiter_is_rejected() {
        assert!(matches!(
            build_request("describe this image"),
            Err(PipelineError::MissingImageDelimiter)
        ));
    }

    #[test]
    fn test_extracts_path_and_substitutes_placeholder() {
        let req = build_request("describe this {{./img.jpg}} please").unwrap();
        assert_eq!(req.image, Path::new("./img.jpg"));
        assert!(!req.prompt.contains("{{"));
        assert!(req.prompt.contains(IMAGE_PLACEHOLDER));
        assert!(req.prompt.contains("describe this"));
    }

    #[test]
    fn test_chatml_framing() {
        let req = build_request("what is in {{a.png}}?").unwrap();
        assert!(req.prompt.starts_with("<|im_start|>system\n"));
        assert!(req.prompt.contains("<|im_start|>user\n"));
        assert!(req.prompt.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn test_first_delimiter_wins() {
        let req = build_request("{{one.jpg}} and {{two.jpg}}").unwrap();
        assert_eq!(req.image, Path::new("one.jpg"));
        // The second delimiter is left as literal text.
        assert!(req.prompt.contains("{{two.jpg}}"));
    }
}
