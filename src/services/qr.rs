use qrcode::render::svg;
use qrcode::QrCode;

#[derive(thiserror::Error, Debug)]
pub enum QrError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    PngError(#[from] image::ImageError),
}

/// Renders arbitrary payload data as a QR code SVG.
pub fn render_svg(data: &str) -> Result<String, QrError> {
    let code = QrCode::new(data.as_bytes())?;

    let svg = code.render::<svg::Color>().min_dimensions(200, 200).build();

    Ok(svg)
}

/// Renders arbitrary payload data as a QR code PNG.
pub fn render_png(data: &str) -> Result<Vec<u8>, QrError> {
    use image::{ImageBuffer, Luma};

    let code = QrCode::new(data.as_bytes())?;

    // Each module is 10x10 pixels
    let module_size = 10u32;
    let width = code.width() as u32;
    let img_size = width * module_size;

    let mut img = ImageBuffer::<Luma<u8>, Vec<u8>>::new(img_size, img_size);

    for (x, y, color) in img.enumerate_pixels_mut() {
        let module_x = x / module_size;
        let module_y = y / module_size;
        let module_color = code[(module_x as usize, module_y as usize)];
        let pixel_value = match module_color {
            qrcode::types::Color::Dark => Luma([0u8]),
            qrcode::types::Color::Light => Luma([255u8]),
        };
        *color = pixel_value;
    }

    let mut png_data = Vec::new();
    image::DynamicImage::ImageLuma8(img).write_to(
        &mut std::io::Cursor::new(&mut png_data),
        image::ImageFormat::Png,
    )?;

    Ok(png_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_svg_generation() {
        let svg = render_svg(r#"{"booking_id":"b1","signature":"abc"}"#);

        assert!(svg.is_ok());
        let svg_str = svg.unwrap();
        assert!(svg_str.contains("<svg"));
        assert!(svg_str.contains("</svg>"));
    }

    #[test]
    fn test_png_generation() {
        let png = render_png("checkin-token").unwrap();

        // PNG magic bytes
        assert_eq!(&png[..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
    }
}
