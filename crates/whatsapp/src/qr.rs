//! Rendering of credential-linking QR challenges.

use {
    base64::Engine,
    image::{ImageBuffer, Luma},
    qrcode::{Color, EcLevel, QrCode},
};

use crate::error::{Error, Result};

const MODULE_PX: u32 = 8;
const QUIET_ZONE: u32 = 4;

fn encode(payload: &str) -> Result<QrCode> {
    QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::L)
        .map_err(|e| Error::Qr(e.to_string()))
}

/// Render a QR code for a terminal using half-block characters, two module
/// rows per text line.
pub fn render_terminal(payload: &str) -> Result<String> {
    let code = encode(payload)?;
    let width = code.width();
    let colors = code.into_colors();
    let dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::with_capacity((width + 1) * width.div_ceil(2));
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }
    Ok(out)
}

/// Render a QR code as PNG bytes.
pub fn render_png(payload: &str) -> Result<Vec<u8>> {
    let code = encode(payload)?;
    let modules = code.width() as u32;
    let size = (modules + QUIET_ZONE * 2) * MODULE_PX;

    let img = ImageBuffer::from_fn(size, size, |x, y| {
        let (mx, my) = (x / MODULE_PX, y / MODULE_PX);
        let inside = (QUIET_ZONE..QUIET_ZONE + modules).contains(&mx)
            && (QUIET_ZONE..QUIET_ZONE + modules).contains(&my);
        if inside
            && code[((mx - QUIET_ZONE) as usize, (my - QUIET_ZONE) as usize)] == Color::Dark
        {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| Error::Qr(format!("PNG encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

/// Render a QR code as a `data:image/png;base64,...` URL.
pub fn render_data_url(payload: &str) -> Result<String> {
    let png = render_png(payload)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}
