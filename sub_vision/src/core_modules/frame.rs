// THEORY:
// The `frame` module is the entry point of every pipeline invocation. A `Frame`
// is the raw picture a camera delivered; a `NormalizedFrame` is the same picture
// after two fixed preparation steps:
//
// 1.  **Orientation**: the downward camera is mounted sideways, so its frames are
//     transposed and flipped (a quarter turn counter-clockwise) into an upright
//     view. Forward frames pass through untouched.
// 2.  **Color space**: classification works on hue/saturation/value, so an HSV
//     copy is produced next to the RGB one. Annotation keeps drawing on the RGB
//     copy, which is what gets published.
//
// HSV channels follow the common 8-bit convention: hue is halved into 0..180 so
// it fits a byte, saturation and value span 0..=255.

use crate::error::{Result, VisionError};
use image::{ImageBuffer, Rgb, RgbImage, imageops};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// An 8-bit image whose three channels hold hue (0..180), saturation and value.
pub type HsvImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// The cameras mounted on the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Camera {
    Forward,
    Downward,
}

impl Camera {
    pub const ALL: [Camera; 2] = [Camera::Forward, Camera::Downward];

    /// Whether frames from this camera already arrive upright.
    pub fn is_upright(self) -> bool {
        matches!(self, Camera::Forward)
    }

    pub fn name(self) -> &'static str {
        match self {
            Camera::Forward => "forward",
            Camera::Downward => "downward",
        }
    }
}

impl fmt::Display for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single picture as delivered by the frame source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera: Camera,
    pub timestamp: SystemTime,
    pub image: RgbImage,
}

impl Frame {
    /// Wraps an image captured right now.
    pub fn new(camera: Camera, image: RgbImage) -> Self {
        Self::with_timestamp(camera, SystemTime::now(), image)
    }

    pub fn with_timestamp(camera: Camera, timestamp: SystemTime, image: RgbImage) -> Self {
        Self {
            camera,
            timestamp,
            image,
        }
    }

    /// Rejects frames the pipeline cannot work on. Called before any state is touched.
    pub fn validate(&self) -> Result<()> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Err(VisionError::MalformedFrame(format!(
                "{} frame has zero size ({}x{})",
                self.camera,
                self.image.width(),
                self.image.height()
            )));
        }
        Ok(())
    }
}

/// An upright frame with its HSV twin.
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    pub camera: Camera,
    pub timestamp: SystemTime,
    /// Upright RGB picture; annotations are drawn here.
    pub rgb: RgbImage,
    /// Upright HSV picture; classification reads from here.
    pub hsv: HsvImage,
}

impl NormalizedFrame {
    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }
}

/// Orients a frame upright and derives its HSV copy.
pub fn normalize(frame: Frame) -> NormalizedFrame {
    let rgb = if frame.camera.is_upright() {
        frame.image
    } else {
        // transpose followed by a vertical flip
        imageops::rotate270(&frame.image)
    };
    let hsv = to_hsv(&rgb);

    NormalizedFrame {
        camera: frame.camera,
        timestamp: frame.timestamp,
        rgb,
        hsv,
    }
}

/// Converts a whole RGB image to HSV.
pub fn to_hsv(image: &RgbImage) -> HsvImage {
    let mut hsv = HsvImage::new(image.width(), image.height());
    for (target, source) in hsv.pixels_mut().zip(image.pixels()) {
        *target = Rgb(rgb_to_hsv(source.0));
    }
    hsv
}

/// Converts one RGB triple to 8-bit HSV (hue halved into 0..180).
pub fn rgb_to_hsv([red, green, blue]: [u8; 3]) -> [u8; 3] {
    let maximum_channel = red.max(green).max(blue);
    let minimum_channel = red.min(green).min(blue);
    let chroma = (maximum_channel - minimum_channel) as f32;

    let value = maximum_channel;
    if maximum_channel == 0 || chroma == 0.0 {
        return [0, 0, value];
    }
    let saturation = (255.0 * chroma / maximum_channel as f32).round() as u8;

    let (red, green, blue) = (red as f32, green as f32, blue as f32);
    let (base_difference, sector_offset) = if maximum_channel as f32 == red {
        (green - blue, 0.0)
    } else if maximum_channel as f32 == green {
        (blue - red, 2.0)
    } else {
        (red - green, 4.0)
    };

    let mut hue_degrees = (base_difference / chroma + sector_offset) * 60.0;
    if hue_degrees < 0.0 {
        hue_degrees += 360.0;
    }
    let hue = ((hue_degrees / 2.0).round() as u16 % 180) as u8;

    [hue, saturation, value]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_colors_map_to_expected_hues() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([255, 255, 0]), [30, 255, 255]);
    }

    #[test]
    fn grays_have_no_hue_or_saturation() {
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
        assert_eq!(rgb_to_hsv([255, 255, 255]), [0, 0, 255]);
    }

    #[test]
    fn hue_never_leaves_byte_range() {
        // Just below full circle, would round to 180 without the wrap.
        let [hue, _, _] = rgb_to_hsv([255, 0, 1]);
        assert!(hue < 180);
    }

    #[test]
    fn forward_frames_pass_through() {
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 0, Rgb([9, 9, 9]));
        let normalized = normalize(Frame::new(Camera::Forward, image.clone()));
        assert_eq!(normalized.rgb, image);
        assert_eq!(normalized.hsv.dimensions(), (3, 2));
    }

    #[test]
    fn downward_frames_are_rotated_upright() {
        // 3 wide, 2 tall. After transpose + vertical flip: 2 wide, 3 tall and
        // source (x, y) lands on (y, width - 1 - x).
        let mut image = RgbImage::new(3, 2);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(2, 1, Rgb([0, 0, 255]));

        let normalized = normalize(Frame::new(Camera::Downward, image));
        assert_eq!(normalized.rgb.dimensions(), (2, 3));
        assert_eq!(normalized.rgb.get_pixel(0, 2), &Rgb([255, 0, 0]));
        assert_eq!(normalized.rgb.get_pixel(1, 0), &Rgb([0, 0, 255]));
        assert_eq!(normalized.hsv.get_pixel(0, 2), &Rgb([0, 255, 255]));
    }

    #[test]
    fn zero_sized_frames_are_rejected() {
        let frame = Frame::new(Camera::Forward, RgbImage::new(0, 10));
        assert!(matches!(frame.validate(), Err(VisionError::MalformedFrame(_))));
        let frame = Frame::new(Camera::Forward, RgbImage::new(4, 4));
        assert!(frame.validate().is_ok());
    }
}
