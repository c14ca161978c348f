//! Tool request definitions.
//!
//! Each tool is a variant with typed fields and a validating constructor:
//! unknown formats, out-of-range values, and same-unit conversions are
//! rejected here, before anything touches the network. The variant also
//! knows its endpoint path and how to serialize its options into the JSON
//! body the backend expects.

use crate::error::ApiError;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "png" => Ok(ImageFormat::Png),
            "webp" => Ok(ImageFormat::Webp),
            other => Err(ApiError::Validation(format!(
                "unsupported image format '{}' (expected jpeg, png or webp)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateFlipOp {
    Rotate90Cw,
    Rotate90Ccw,
    Rotate180,
    FlipHorizontal,
    FlipVertical,
}

impl RotateFlipOp {
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "rotate_90_cw" => Ok(RotateFlipOp::Rotate90Cw),
            "rotate_90_ccw" => Ok(RotateFlipOp::Rotate90Ccw),
            "rotate_180" => Ok(RotateFlipOp::Rotate180),
            "flip_horizontal" => Ok(RotateFlipOp::FlipHorizontal),
            "flip_vertical" => Ok(RotateFlipOp::FlipVertical),
            other => Err(ApiError::Validation(format!(
                "unknown operation '{}' (expected rotate_90_cw, rotate_90_ccw, rotate_180, flip_horizontal or flip_vertical)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RotateFlipOp::Rotate90Cw => "rotate_90_cw",
            RotateFlipOp::Rotate90Ccw => "rotate_90_ccw",
            RotateFlipOp::Rotate180 => "rotate_180",
            RotateFlipOp::FlipHorizontal => "flip_horizontal",
            RotateFlipOp::FlipVertical => "flip_vertical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Center,
}

impl WatermarkPosition {
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s {
            "top-left" => Ok(WatermarkPosition::TopLeft),
            "top-right" => Ok(WatermarkPosition::TopRight),
            "bottom-left" => Ok(WatermarkPosition::BottomLeft),
            "bottom-right" => Ok(WatermarkPosition::BottomRight),
            "center" => Ok(WatermarkPosition::Center),
            other => Err(ApiError::Validation(format!(
                "unknown position '{}' (expected top-left, top-right, bottom-left, bottom-right or center)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatermarkPosition::TopLeft => "top-left",
            WatermarkPosition::TopRight => "top-right",
            WatermarkPosition::BottomLeft => "bottom-left",
            WatermarkPosition::BottomRight => "bottom-right",
            WatermarkPosition::Center => "center",
        }
    }
}

/// A validated tool invocation request.
#[derive(Debug, Clone)]
pub enum ToolRequest {
    RemoveBackground,
    AddWatermark {
        text: String,
        position: WatermarkPosition,
        opacity: f64,
        font_size: u32,
        font_color: String,
    },
    RemoveWatermark,
    CompressImage {
        quality: u8,
        format: ImageFormat,
        max_size_kb: Option<u32>,
    },
    ConvertFormat {
        format: ImageFormat,
        quality: u8,
    },
    CropImage {
        preset: String,
    },
    RotateFlip {
        operation: RotateFlipOp,
    },
    SuperResolution {
        scale: u8,
    },
    AnalyzeKeywords {
        action: String,
        product_description: String,
        platform: String,
        competitor_asin: Option<String>,
    },
    GenerateListing {
        product_info: String,
        platform: String,
        language: String,
        style: String,
    },
    ConvertCurrency {
        amount: f64,
        from: String,
        to: String,
    },
    ConvertUnits {
        category: String,
        value: f64,
        from: String,
        to: String,
    },
}

fn check_quality(quality: i64) -> Result<u8, ApiError> {
    if (1..=100).contains(&quality) {
        Ok(quality as u8)
    } else {
        Err(ApiError::Validation(
            "quality must be between 1 and 100".to_string(),
        ))
    }
}

fn require(value: &str, what: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ApiError::Validation(format!("{} is required", what)))
    } else {
        Ok(trimmed.to_string())
    }
}

impl ToolRequest {
    pub fn add_watermark(
        text: &str,
        position: &str,
        opacity: f64,
        font_size: i64,
        font_color: &str,
    ) -> Result<Self, ApiError> {
        if !(0.1..=1.0).contains(&opacity) {
            return Err(ApiError::Validation(
                "opacity must be between 0.1 and 1.0".to_string(),
            ));
        }
        if !(10..=200).contains(&font_size) {
            return Err(ApiError::Validation(
                "font size must be between 10 and 200".to_string(),
            ));
        }
        Ok(ToolRequest::AddWatermark {
            text: require(text, "watermark text")?,
            position: WatermarkPosition::parse(position)?,
            opacity,
            font_size: font_size as u32,
            font_color: require(font_color, "font color")?,
        })
    }

    pub fn compress_image(
        quality: i64,
        format: &str,
        max_size_kb: Option<i64>,
    ) -> Result<Self, ApiError> {
        let max_size_kb = match max_size_kb {
            Some(kb) if (1..=5000).contains(&kb) => Some(kb as u32),
            Some(_) => {
                return Err(ApiError::Validation(
                    "max size must be between 1 and 5000 KB".to_string(),
                ))
            }
            None => None,
        };
        Ok(ToolRequest::CompressImage {
            quality: check_quality(quality)?,
            format: ImageFormat::parse(format)?,
            max_size_kb,
        })
    }

    pub fn convert_format(format: &str, quality: i64) -> Result<Self, ApiError> {
        Ok(ToolRequest::ConvertFormat {
            format: ImageFormat::parse(format)?,
            quality: check_quality(quality)?,
        })
    }

    pub fn crop_image(preset: &str) -> Result<Self, ApiError> {
        Ok(ToolRequest::CropImage {
            preset: require(preset, "crop preset")?,
        })
    }

    pub fn rotate_flip(operation: &str) -> Result<Self, ApiError> {
        Ok(ToolRequest::RotateFlip {
            operation: RotateFlipOp::parse(operation)?,
        })
    }

    pub fn super_resolution(scale: i64) -> Result<Self, ApiError> {
        if scale != 2 && scale != 4 {
            return Err(ApiError::Validation(
                "scale must be 2 or 4".to_string(),
            ));
        }
        Ok(ToolRequest::SuperResolution { scale: scale as u8 })
    }

    pub fn analyze_keywords(
        action: &str,
        product_description: &str,
        platform: &str,
        competitor_asin: Option<&str>,
    ) -> Result<Self, ApiError> {
        let platform = platform.trim();
        Ok(ToolRequest::AnalyzeKeywords {
            action: require(action, "action")?,
            product_description: require(product_description, "product description")?,
            platform: if platform.is_empty() {
                "amazon".to_string()
            } else {
                platform.to_string()
            },
            competitor_asin: competitor_asin
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        })
    }

    pub fn generate_listing(
        product_info: &str,
        platform: &str,
        language: &str,
        style: &str,
    ) -> Result<Self, ApiError> {
        Ok(ToolRequest::GenerateListing {
            product_info: require(product_info, "product info")?,
            platform: require(platform, "platform")?,
            language: require(language, "language")?,
            style: require(style, "style")?,
        })
    }

    pub fn convert_currency(amount: f64, from: &str, to: &str) -> Result<Self, ApiError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ApiError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        let from = require(from, "source currency")?.to_uppercase();
        let to = require(to, "target currency")?.to_uppercase();
        if from == to {
            return Err(ApiError::Validation(
                "source and target currencies must differ".to_string(),
            ));
        }
        Ok(ToolRequest::ConvertCurrency { amount, from, to })
    }

    pub fn convert_units(
        category: &str,
        value: f64,
        from: &str,
        to: &str,
    ) -> Result<Self, ApiError> {
        if !value.is_finite() {
            return Err(ApiError::Validation("value must be a number".to_string()));
        }
        let from = require(from, "source unit")?;
        let to = require(to, "target unit")?;
        if from == to {
            return Err(ApiError::Validation(
                "source and target units must differ".to_string(),
            ));
        }
        Ok(ToolRequest::ConvertUnits {
            category: require(category, "category")?,
            value,
            from,
            to,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::RemoveBackground => "background remover",
            ToolRequest::AddWatermark { .. } => "watermark",
            ToolRequest::RemoveWatermark => "watermark remover",
            ToolRequest::CompressImage { .. } => "image compressor",
            ToolRequest::ConvertFormat { .. } => "format converter",
            ToolRequest::CropImage { .. } => "image cropper",
            ToolRequest::RotateFlip { .. } => "rotate/flip",
            ToolRequest::SuperResolution { .. } => "super resolution",
            ToolRequest::AnalyzeKeywords { .. } => "keyword analyzer",
            ToolRequest::GenerateListing { .. } => "listing generator",
            ToolRequest::ConvertCurrency { .. } => "currency converter",
            ToolRequest::ConvertUnits { .. } => "unit converter",
        }
    }

    /// Static tool -> endpoint path mapping.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ToolRequest::RemoveBackground => "/api/tools/remove-background",
            ToolRequest::AddWatermark { .. } => "/api/tools/add-watermark-v2",
            ToolRequest::RemoveWatermark => "/api/tools/remove-watermark",
            ToolRequest::CompressImage { .. } => "/api/tools/compress-image",
            ToolRequest::ConvertFormat { .. } => "/api/tools/convert-format",
            ToolRequest::CropImage { .. } => "/api/tools/crop-image",
            ToolRequest::RotateFlip { .. } => "/api/tools/rotate-flip",
            ToolRequest::SuperResolution { .. } => "/api/tools/super-resolution",
            ToolRequest::AnalyzeKeywords { .. } => "/api/tools/keyword-analyzer",
            ToolRequest::GenerateListing { .. } => "/api/tools/generate-listing",
            ToolRequest::ConvertCurrency { .. } => "/api/tools/currency-converter",
            ToolRequest::ConvertUnits { .. } => "/api/tools/unit-converter",
        }
    }

    /// Image tools carry a base64 payload; helper tools are JSON-only.
    pub fn needs_image(&self) -> bool {
        matches!(
            self,
            ToolRequest::RemoveBackground
                | ToolRequest::AddWatermark { .. }
                | ToolRequest::RemoveWatermark
                | ToolRequest::CompressImage { .. }
                | ToolRequest::ConvertFormat { .. }
                | ToolRequest::CropImage { .. }
                | ToolRequest::RotateFlip { .. }
                | ToolRequest::SuperResolution { .. }
        )
    }

    /// Text tools refuse to run without a login; image tools send no
    /// header when anonymous and let the backend decide.
    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            ToolRequest::AnalyzeKeywords { .. }
                | ToolRequest::GenerateListing { .. }
                | ToolRequest::ConvertCurrency { .. }
                | ToolRequest::ConvertUnits { .. }
        )
    }

    /// Serialize the options into the field names the backend expects.
    pub fn options(&self) -> Value {
        match self {
            ToolRequest::RemoveBackground | ToolRequest::RemoveWatermark => json!({}),
            ToolRequest::AddWatermark {
                text,
                position,
                opacity,
                font_size,
                font_color,
            } => json!({
                "watermark_text": text,
                "watermark_position": position.as_str(),
                "opacity": opacity,
                "font_size": font_size,
                "font_color": font_color,
            }),
            ToolRequest::CompressImage {
                quality,
                format,
                max_size_kb,
            } => {
                let mut body = json!({ "quality": quality, "format": format.as_str() });
                if let Some(kb) = max_size_kb {
                    body["max_size"] = json!(kb);
                }
                body
            }
            ToolRequest::ConvertFormat { format, quality } => {
                json!({ "format": format.as_str(), "quality": quality })
            }
            ToolRequest::CropImage { preset } => json!({ "preset": preset }),
            ToolRequest::RotateFlip { operation } => json!({ "operation": operation.as_str() }),
            ToolRequest::SuperResolution { scale } => json!({ "scale": scale }),
            ToolRequest::AnalyzeKeywords {
                action,
                product_description,
                platform,
                competitor_asin,
            } => {
                let mut body = json!({
                    "action": action,
                    "product_description": product_description,
                    "platform": platform,
                });
                if let Some(asin) = competitor_asin {
                    body["competitor_asin"] = json!(asin);
                }
                body
            }
            ToolRequest::GenerateListing {
                product_info,
                platform,
                language,
                style,
            } => json!({
                "product_info": product_info,
                "platform": platform,
                "language": language,
                "style": style,
            }),
            ToolRequest::ConvertCurrency { amount, from, to } => json!({
                "amount": amount,
                "from_currency": from,
                "to_currency": to,
            }),
            ToolRequest::ConvertUnits {
                category,
                value,
                from,
                to,
            } => json!({
                "category": category,
                "value": value,
                "from_unit": from,
                "to_unit": to,
            }),
        }
    }
}
