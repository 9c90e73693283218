//! Input validation for post forms.
//!
//! Text fields go through `validator`; the optional image is checked by
//! sniffing its content rather than trusting the client's filename or
//! content type.

use bytes::Bytes;
use image::ImageFormat;
use serde::Serialize;
use std::{collections::BTreeMap, fmt};
use validator::Validate;

/// Largest accepted image, 5120 KiB.
pub const MAX_IMAGE_BYTES: usize = 5120 * 1024;

const ACCEPTED_TYPES: &str = "jpeg, png, jpg, gif, webp, svg, bmp, tiff, ico";

/// Image encodings accepted as post attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    WebP,
    Svg,
    Bmp,
    Tiff,
    Ico,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::WebP => "webp",
            ImageKind::Svg => "svg",
            ImageKind::Bmp => "bmp",
            ImageKind::Tiff => "tiff",
            ImageKind::Ico => "ico",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::WebP => "image/webp",
            ImageKind::Svg => "image/svg+xml",
            ImageKind::Bmp => "image/bmp",
            ImageKind::Tiff => "image/tiff",
            ImageKind::Ico => "image/x-icon",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "gif" => Some(ImageKind::Gif),
            "webp" => Some(ImageKind::WebP),
            "svg" => Some(ImageKind::Svg),
            "bmp" => Some(ImageKind::Bmp),
            "tif" | "tiff" => Some(ImageKind::Tiff),
            "ico" => Some(ImageKind::Ico),
            _ => None,
        }
    }
}

/// Result of sniffing an upload's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    Accepted(ImageKind),
    /// A raster format we recognise but do not accept (e.g. TGA, PNM).
    OtherImage,
    NotAnImage,
}

/// Detect the encoding of an upload from its leading bytes.
pub fn sniff_image(bytes: &[u8]) -> Sniffed {
    match image::guess_format(bytes) {
        Ok(format) => match format {
            ImageFormat::Jpeg => Sniffed::Accepted(ImageKind::Jpeg),
            ImageFormat::Png => Sniffed::Accepted(ImageKind::Png),
            ImageFormat::Gif => Sniffed::Accepted(ImageKind::Gif),
            ImageFormat::WebP => Sniffed::Accepted(ImageKind::WebP),
            ImageFormat::Bmp => Sniffed::Accepted(ImageKind::Bmp),
            ImageFormat::Tiff => Sniffed::Accepted(ImageKind::Tiff),
            ImageFormat::Ico => Sniffed::Accepted(ImageKind::Ico),
            _ => Sniffed::OtherImage,
        },
        Err(_) if looks_like_svg(bytes) => Sniffed::Accepted(ImageKind::Svg),
        Err(_) => Sniffed::NotAnImage,
    }
}

/// True when the document's root element is `<svg`, allowing for a BOM,
/// an XML prolog, comments and a doctype (with or without an internal
/// subset) in front of it.
fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(4096)];
    let text = String::from_utf8_lossy(head);
    let mut rest = text.trim_start_matches('\u{feff}').trim_start();

    loop {
        if rest.starts_with("<svg") {
            return true;
        }
        let end = if rest.starts_with("<?") {
            rest.find("?>").map(|pos| pos + 2)
        } else if rest.starts_with("<!--") {
            rest.find("-->").map(|pos| pos + 3)
        } else if rest.starts_with("<!") {
            declaration_end(rest)
        } else {
            return false;
        };
        match end {
            Some(end) => rest = rest[end..].trim_start(),
            None => return false,
        }
    }
}

/// Byte offset just past a `<!...>` declaration. An internal subset in
/// `[...]` may itself contain `>`, so it is skipped as a unit.
fn declaration_end(decl: &str) -> Option<usize> {
    let close = decl.find('>')?;
    match decl.find('[') {
        Some(open) if open < close => {
            let subset_end = open + decl[open..].find(']')?;
            decl[subset_end..].find('>').map(|pos| subset_end + pos + 1)
        }
        _ => Some(close + 1),
    }
}

/// Per-field validation messages, keyed by form field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self.0.values().flatten().next();
        match first {
            Some(msg) => write!(f, "{}", msg),
            None => write!(f, "validation failed"),
        }
    }
}

impl From<validator::ValidationErrors> for FieldErrors {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut out = FieldErrors::default();
        for (field, errs) in errors.field_errors() {
            for err in errs.iter() {
                let msg = err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string());
                out.add(field.to_string(), msg);
            }
        }
        out
    }
}

/// An uploaded file as received from the form.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub bytes: Bytes,
}

/// Raw form input for create and update.
#[derive(Debug, Clone, Default)]
pub struct PostInput {
    pub title: String,
    pub description: String,
    pub image: Option<ImageUpload>,
}

/// A validated image ready to hand to blob storage.
#[derive(Debug, Clone)]
pub struct ValidImage {
    pub kind: ImageKind,
    pub bytes: Bytes,
}

/// Input that passed every check.
#[derive(Debug, Clone)]
pub struct ValidPost {
    pub title: String,
    pub description: String,
    pub image: Option<ValidImage>,
}

#[derive(Debug, Validate)]
struct TextFields {
    #[validate(
        required(message = "The title field is required."),
        length(
            max = 255,
            message = "The title field must not be greater than 255 characters."
        )
    )]
    title: Option<String>,

    #[validate(required(message = "The description field is required."))]
    description: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn check_image(upload: &ImageUpload, errors: &mut FieldErrors) -> Option<ValidImage> {
    let kind = match sniff_image(&upload.bytes) {
        Sniffed::Accepted(kind) => Some(kind),
        Sniffed::OtherImage => {
            errors.add(
                "image",
                format!("The image field must be a file of type: {}.", ACCEPTED_TYPES),
            );
            None
        }
        Sniffed::NotAnImage => {
            errors.add("image", "The image field must be an image.");
            errors.add(
                "image",
                format!("The image field must be a file of type: {}.", ACCEPTED_TYPES),
            );
            None
        }
    };

    if upload.bytes.len() > MAX_IMAGE_BYTES {
        errors.add(
            "image",
            "The image field must not be greater than 5120 kilobytes.",
        );
        return None;
    }

    kind.map(|kind| ValidImage {
        kind,
        bytes: upload.bytes.clone(),
    })
}

/// Validate a create/update form. Whitespace is trimmed from text fields
/// before any rule runs.
pub fn validate_post(input: &PostInput) -> Result<ValidPost, FieldErrors> {
    let fields = TextFields {
        title: non_empty(&input.title),
        description: non_empty(&input.description),
    };

    let mut errors = match fields.validate() {
        Ok(()) => FieldErrors::default(),
        Err(errs) => FieldErrors::from(errs),
    };

    let image = input
        .image
        .as_ref()
        .and_then(|upload| check_image(upload, &mut errors));

    if !errors.is_empty() {
        return Err(errors);
    }

    match (fields.title, fields.description) {
        (Some(title), Some(description)) => Ok(ValidPost {
            title,
            description,
            image,
        }),
        _ => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn input(title: &str, description: &str) -> PostInput {
        PostInput {
            title: title.into(),
            description: description.into(),
            image: None,
        }
    }

    fn upload(bytes: Vec<u8>) -> Option<ImageUpload> {
        Some(ImageUpload {
            file_name: Some("upload".into()),
            bytes: Bytes::from(bytes),
        })
    }

    #[test]
    fn trims_and_accepts_plain_text_post() {
        let valid = validate_post(&input("  Hello ", "World\n")).unwrap();
        assert_eq!(valid.title, "Hello");
        assert_eq!(valid.description, "World");
        assert!(valid.image.is_none());
    }

    #[test]
    fn empty_and_blank_fields_are_required() {
        let errors = validate_post(&input("", "   ")).unwrap_err();
        assert_eq!(
            errors.get("title").unwrap(),
            ["The title field is required."]
        );
        assert_eq!(
            errors.get("description").unwrap(),
            ["The description field is required."]
        );
    }

    #[test]
    fn title_length_is_counted_in_characters() {
        assert!(validate_post(&input(&"é".repeat(255), "body")).is_ok());

        let errors = validate_post(&input(&"a".repeat(256), "body")).unwrap_err();
        assert_eq!(
            errors.get("title").unwrap(),
            ["The title field must not be greater than 255 characters."]
        );
    }

    #[test]
    fn sniffs_accepted_raster_formats() {
        assert_eq!(sniff_image(PNG), Sniffed::Accepted(ImageKind::Png));
        assert_eq!(
            sniff_image(b"\xff\xd8\xff\xe0\0\x10JFIF"),
            Sniffed::Accepted(ImageKind::Jpeg)
        );
        assert_eq!(sniff_image(b"GIF89a\x01\0"), Sniffed::Accepted(ImageKind::Gif));
        assert_eq!(
            sniff_image(b"RIFF\0\0\0\0WEBPVP8 "),
            Sniffed::Accepted(ImageKind::WebP)
        );
        assert_eq!(sniff_image(b"BM\0\0\0\0\0\0"), Sniffed::Accepted(ImageKind::Bmp));
        assert_eq!(sniff_image(b"II*\0\x08\0\0\0"), Sniffed::Accepted(ImageKind::Tiff));
        assert_eq!(sniff_image(b"\0\0\x01\0\x01\0"), Sniffed::Accepted(ImageKind::Ico));
    }

    #[test]
    fn sniffs_svg_behind_prolog_and_comments() {
        let doc = b"\xef\xbb\xbf<?xml version=\"1.0\"?>\n<!-- drawn by hand -->\n\
            <!DOCTYPE svg PUBLIC \"-//W3C//DTD SVG 1.1//EN\" \"x\">\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>";
        assert_eq!(sniff_image(doc), Sniffed::Accepted(ImageKind::Svg));
        assert_eq!(sniff_image(b"<html><svg/></html>"), Sniffed::NotAnImage);
    }

    #[test]
    fn sniffs_svg_behind_doctype_with_internal_subset() {
        let doc = b"<?xml version=\"1.0\"?>\n<!DOCTYPE svg [\n  <!ENTITY ns \"http://www.w3.org/2000/svg\">\n  <!ENTITY w \"10\">\n]>\n<svg xmlns=\"&ns;\" width=\"&w;\"/>";
        assert_eq!(sniff_image(doc), Sniffed::Accepted(ImageKind::Svg));
        assert_eq!(
            sniff_image(b"<!DOCTYPE svg [ <!ENTITY a \"b\"> "),
            Sniffed::NotAnImage
        );
    }

    #[test]
    fn rejects_non_images() {
        let mut form = input("A", "B");
        form.image = upload(b"just some text".to_vec());
        let errors = validate_post(&form).unwrap_err();
        let msgs = errors.get("image").unwrap();
        assert_eq!(msgs[0], "The image field must be an image.");
        assert!(msgs[1].starts_with("The image field must be a file of type: jpeg"));
    }

    #[test]
    fn rejects_images_over_five_mebibytes() {
        let mut bytes = PNG.to_vec();
        bytes.resize(6 * 1024 * 1024, 0);
        let mut form = input("A", "B");
        form.image = upload(bytes);

        let errors = validate_post(&form).unwrap_err();
        assert_eq!(
            errors.get("image").unwrap(),
            ["The image field must not be greater than 5120 kilobytes."]
        );
    }

    #[test]
    fn accepts_image_at_exact_limit() {
        let mut bytes = PNG.to_vec();
        bytes.resize(MAX_IMAGE_BYTES, 0);
        let mut form = input("A", "B");
        form.image = upload(bytes);

        let valid = validate_post(&form).unwrap();
        assert_eq!(valid.image.unwrap().kind, ImageKind::Png);
    }

    #[test]
    fn collects_errors_across_fields() {
        let mut form = input("", "B");
        form.image = upload(b"nope".to_vec());
        let errors = validate_post(&form).unwrap_err();
        assert!(errors.contains("title"));
        assert!(errors.contains("image"));
        assert!(!errors.contains("description"));
        assert_eq!(errors.to_string(), "The image field must be an image.");
    }

    #[test]
    fn extension_lookup_accepts_aliases() {
        assert_eq!(ImageKind::from_extension("JPEG"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_extension("tif"), Some(ImageKind::Tiff));
        assert_eq!(ImageKind::from_extension("exe"), None);
    }
}
