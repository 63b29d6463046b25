use async_trait::async_trait;

use crate::collab::{ImageRef, RenderContext, RenderValue, Renderer};
use crate::error::RenderError;

/// Substitutes `{name}` (text) and `{%name}` (image) tags in a UTF-8 HTML
/// template. Text is HTML-escaped; images become `<img>` elements pointing at
/// the image file, which must exist.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderRenderer;

impl PlaceholderRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for PlaceholderRenderer {
    async fn render(
        &self,
        template: &[u8],
        context: &RenderContext,
    ) -> Result<Vec<u8>, RenderError> {
        let template = std::str::from_utf8(template)
            .map_err(|e| RenderError::MalformedTemplate(format!("not UTF-8: {}", e)))?;

        let tags = parse(template)?;
        let mut out = String::with_capacity(template.len());
        for piece in tags {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Tag { name, image } => {
                    let value = context
                        .get(name)
                        .ok_or_else(|| RenderError::MissingPlaceholder(name.to_string()))?;
                    match (value, image) {
                        (RenderValue::Text(text), false) => out.push_str(&escape(text)),
                        (RenderValue::Text(_), true) => {
                            return Err(RenderError::MalformedTemplate(format!(
                                "placeholder {:?} is used as an image but holds text",
                                name
                            )))
                        }
                        (RenderValue::Image(image_ref), _) => {
                            out.push_str(&image_tag(name, image_ref).await?)
                        }
                    }
                }
            }
        }
        Ok(out.into_bytes())
    }
}

enum Piece<'a> {
    Literal(&'a str),
    Tag { name: &'a str, image: bool },
}

fn parse(template: &str) -> Result<Vec<Piece<'_>>, RenderError> {
    let mut pieces = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        if open > 0 {
            pieces.push(Piece::Literal(&rest[..open]));
        }
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            RenderError::MalformedTemplate(format!(
                "unclosed tag at byte {}",
                template.len() - rest.len() + open
            ))
        })?;
        let raw = after[..close].trim();
        let (name, image) = match raw.strip_prefix('%') {
            Some(name) => (name.trim(), true),
            None => (raw, false),
        };
        if name.is_empty() || name.contains('{') {
            return Err(RenderError::MalformedTemplate(format!(
                "invalid tag {{{}}}",
                &after[..close]
            )));
        }
        pieces.push(Piece::Tag { name, image });
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest));
    }
    Ok(pieces)
}

async fn image_tag(placeholder: &str, image: &ImageRef) -> Result<String, RenderError> {
    if !tokio::fs::try_exists(&image.path).await.unwrap_or(false) {
        return Err(RenderError::ImageNotFound {
            placeholder: placeholder.to_string(),
            path: image.path.display().to_string(),
        });
    }
    Ok(format!(
        r#"<img src="file://{}" width="{}" height="{}" alt="{}"/>"#,
        escape(&image.path.to_string_lossy()),
        image.size.width,
        image.size.height,
        escape(placeholder)
    ))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
