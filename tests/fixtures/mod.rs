//! Generated test images and the text a fixture engine "reads" from them
#![allow(dead_code)]

/// An image written to disk for a test. The fixture engine recognizes it by
/// its dimensions after downscaling.
#[derive(Debug, Clone, Copy)]
pub struct ImageFixture {
    pub filename: &'static str,
    pub width: u32,
    pub height: u32,
    pub text: &'static str,
}

impl ImageFixture {
    /// Dimensions the recognizer sees.
    pub fn normalized_size(&self) -> (u32, u32) {
        (
            ((self.width as f64 * 0.5).round() as u32).max(1),
            ((self.height as f64 * 0.5).round() as u32).max(1),
        )
    }
}

pub const RECEIPT: ImageFixture = ImageFixture {
    filename: "receipt.png",
    width: 240,
    height: 120,
    text: "TOTAL 12.50",
};

pub const INVOICE: ImageFixture = ImageFixture {
    filename: "invoice.png",
    width: 300,
    height: 90,
    text: "INVOICE 2024-0042",
};

pub const SIGN: ImageFixture = ImageFixture {
    filename: "sign.jpg",
    width: 64,
    height: 33,
    text: "NO PARKING",
};

pub const IMAGE_FIXTURES: &[ImageFixture] = &[RECEIPT, INVOICE, SIGN];

/// Inputs that can never be decoded.
pub const EMPTY_FILE: &[u8] = b"";
pub const NOT_AN_IMAGE: &[u8] = b"this is plain text, not pixels";
/// PNG signature followed by garbage: passes format sniffing, fails decoding.
pub const TRUNCATED_PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR\x00\x00";
