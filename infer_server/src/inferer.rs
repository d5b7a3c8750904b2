use std::path::Path;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::{
    as_jpeg_stream_item,
    meter::{FrameEvent, METER},
    nn::{Detection, InferModel, UltrafaceModel},
    BroadcastSender, RawFrame, StaticFrameReceiver,
};

const BOX_COLOR: [u8; 3] = [0, 255, 0];

const JPEG_QUALITY: i32 = 90;

pub struct Inferer {
    infer_rx: StaticFrameReceiver,
    model: UltrafaceModel,
    detected_tx: BroadcastSender,
    font: Option<Font<'static>>,
}

impl Inferer {
    pub fn new(
        infer_rx: StaticFrameReceiver,
        model: UltrafaceModel,
        detected_tx: BroadcastSender,
        font: Option<Font<'static>>,
    ) -> Self {
        Self {
            infer_rx,
            model,
            detected_tx,
            font,
        }
    }

    /// Annotate frames until the capture side closes the channel.
    pub async fn run(&self) {
        while let Some(frame) = self.infer_rx.recv_ref().await {
            match annotate_frame(&self.model, &frame, self.font.as_ref()) {
                Ok(jpeg) => {
                    METER.tick(FrameEvent::Annotated);
                    // Fails only when nobody watches the stream
                    self.detected_tx.send(as_jpeg_stream_item(&jpeg)).ok();
                }
                Err(err) => log::warn!("Failed to annotate frame: {:#}", err),
            }
        }

        log::info!("Inference channel closed");
    }
}

/// Decode a JPEG frame, draw the detections on it and encode it again.
pub fn annotate_frame<M: InferModel>(
    model: &M,
    frame: &RawFrame,
    font: Option<&Font<'static>>,
) -> Result<Vec<u8>> {
    let image: RgbImage =
        turbojpeg::decompress_image(&frame.jpeg).context("failed to decompress frame")?;
    if image.dimensions() != (frame.width, frame.height) {
        log::debug!(
            "Frame is {:?}, camera announced {}x{}",
            image.dimensions(),
            frame.width,
            frame.height
        );
    }

    let detections = model.run(&image)?;
    log::debug!("Detections: {:?}", &detections);

    let image = draw_detections(image, &detections, font);
    let buf = turbojpeg::compress_image(&image, JPEG_QUALITY, turbojpeg::Subsamp::Sub2x2)
        .context("failed to compress frame")?;

    Ok(buf.to_vec())
}

/// Draw bounding boxes, and confidence scores if a font is given, on the image.
pub fn draw_detections(
    mut image: RgbImage,
    detections: &[Detection],
    font: Option<&Font<'static>>,
) -> RgbImage {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let color = Rgb(BOX_COLOR);

    for detection in detections {
        // Coordinate frame basis is on the top left corner
        let bbox = detection.bbox;
        let (x_tl, y_tl) = (bbox[0].max(0.0) * width, bbox[1].max(0.0) * height);
        let (x_br, y_br) = (bbox[2].min(1.0) * width, bbox[3].min(1.0) * height);
        if x_br <= x_tl || y_br <= y_tl {
            continue;
        }

        let rect = Rect::at(x_tl as i32, y_tl as i32)
            .of_size(((x_br - x_tl) as u32).max(1), ((y_br - y_tl) as u32).max(1));
        draw_hollow_rect_mut(&mut image, rect, color);

        if let Some(font) = font {
            draw_text_mut(
                &mut image,
                color,
                x_tl as i32,
                y_tl as i32,
                Scale { x: 16.0, y: 16.0 },
                font,
                &format!("{:.2}%", detection.confidence * 100.0),
            );
        }
    }

    image
}

/// Load a TrueType font for the confidence labels.
pub fn load_font(path: &Path) -> Result<Font<'static>> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Font::try_from_vec(data).with_context(|| format!("{} is not a valid font", path.display()))
}
