use crate::labels::LabeledDetection;
use opencv::{
    core::{Mat, Point, Rect, Scalar, Size, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CvError {
    #[error("failed to decode image: {0}")]
    DecodeFailed(opencv::Error),
    #[error("failed to encode frame: {0}")]
    EncodeFailed(opencv::Error),
    #[error("OpenCV error: {0}")]
    OpenCv(opencv::Error),
}

impl From<opencv::Error> for CvError {
    fn from(err: opencv::Error) -> Self {
        CvError::OpenCv(err)
    }
}

/// Decodes an in-memory encoded image (JPEG/PNG/...) into a BGR `Mat`.
pub fn decode_image(bytes: &[u8]) -> Result<Mat, CvError> {
    let mat = imgcodecs::imdecode(&Vector::from_slice(bytes), imgcodecs::IMREAD_COLOR)
        .map_err(CvError::DecodeFailed)?;
    if mat.empty() {
        return Err(CvError::DecodeFailed(opencv::Error::new(
            opencv::core::StsError,
            "image data did not decode to any pixels".to_string(),
        )));
    }
    Ok(mat)
}

pub fn encode_jpg(frame: &Mat) -> Result<Vec<u8>, CvError> {
    let mut buf = Vector::<u8>::new();
    imgcodecs::imencode(".jpg", frame, &mut buf, &Vector::new())
        .map_err(CvError::EncodeFailed)?;
    Ok(buf.into())
}

/// Resizes to exactly `width`x`height`. Aspect ratio is not preserved;
/// distortion is accepted in exchange for a fixed per-frame compute cost.
pub fn resize_exact(frame: &Mat, width: i32, height: i32) -> Result<Mat, CvError> {
    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(width, height),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    Ok(resized)
}

/// Burns detection boxes and labels into the frame's pixel data.
pub fn annotate(frame: &mut Mat, detections: &[LabeledDetection]) -> Result<(), CvError> {
    for det in detections {
        let x1 = det.x1 as i32;
        let y1 = det.y1 as i32;
        let x2 = det.x2 as i32;
        let y2 = det.y2 as i32;
        let label = format!("{}: {:.2}", det.class_label, det.confidence);

        // Scalar channel order is BGR.
        let color = Scalar::new(det.blue as f64, det.green as f64, det.red as f64, 0.0);

        imgproc::rectangle(
            frame,
            Rect::new(x1, y1, x2 - x1, y2 - y1),
            color,
            2,
            imgproc::LINE_8,
            0,
        )?;

        imgproc::put_text(
            frame,
            &label,
            Point::new(x1, y1 - 5),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            1,
            imgproc::LINE_AA,
            false,
        )?;
    }
    Ok(())
}
