use qrcode::render::unicode;
use qrcode::QrCode;

use crate::common::TransferError;

/// Render `url` as a terminal QR code
pub fn generate_qr(url: &str) -> Result<String, TransferError> {
    let code = QrCode::new(url.as_bytes())
        .map_err(|e| TransferError::protocol(format!("link does not fit a QR code: {e}")))?;

    let image = code
        .render::<unicode::Dense1x2>()
        // colors are inverted for better visibility in terminal
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();

    Ok(image)
}

pub fn print_qr(url: &str) -> Result<(), TransferError> {
    println!("\n{}\n", generate_qr(url)?);
    println!("{}", url);
    Ok(())
}
