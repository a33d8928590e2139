use std::sync::Arc;
use std::time::SystemTime;

use image::{GrayImage, Luma, Rgb, RgbImage};
use sub_vision::core_modules::frame::Camera;
use sub_vision::{Detection, Publisher};
use sub_vision_bus::{FrameBus, FrameFormat, FrameKind, detection_json};

fn detection() -> Detection {
    Detection {
        class_id: 1,
        class_name: "gate".to_string(),
        camera: Camera::Forward,
        timestamp: SystemTime::UNIX_EPOCH,
        frame: 4,
        blob_index: 0,
        x: -3.0,
        y: 12.5,
        width: 40.0,
        height: 80.0,
        rotation_degrees: 90.0,
        confidence: 0.75,
        points: 120,
    }
}

#[tokio::test]
async fn detections_reach_every_subscriber() {
    let bus = FrameBus::new(4);
    let mut first = bus.subscribe_detections();
    let mut second = bus.subscribe_detections();

    bus.publish_detection(&detection());
    assert_eq!(first.recv().await.unwrap(), detection());
    assert_eq!(second.recv().await.unwrap(), detection());
}

#[tokio::test]
async fn annotated_frames_are_encoded() {
    let bus = FrameBus::new(4).with_format(FrameFormat::Png);
    let mut frames = bus.subscribe_frames();

    let image = RgbImage::from_pixel(6, 3, Rgb([10, 20, 30]));
    bus.publish_annotated_frame(Camera::Downward, 9, &image);

    let packet = frames.recv().await.unwrap();
    assert_eq!(packet.camera, Camera::Downward);
    assert_eq!(packet.frame, 9);
    assert_eq!(packet.kind, FrameKind::Annotated);
    assert_eq!((packet.width, packet.height), (6, 3));

    let decoded = image::load_from_memory(&packet.data).unwrap().to_rgb8();
    assert_eq!(decoded, image);
}

#[tokio::test]
async fn masks_carry_their_class() {
    let bus = FrameBus::new(4);
    let mut frames = bus.subscribe_frames();

    let mask = GrayImage::from_pixel(8, 8, Luma([230]));
    bus.publish_threshold_mask(Camera::Forward, "paths", 2, &mask);

    let packet = frames.recv().await.unwrap();
    assert_eq!(
        packet.kind,
        FrameKind::ThresholdMask {
            class: "paths".to_string()
        }
    );
    assert!(matches!(packet.format, FrameFormat::Jpeg { .. }));
    let decoded = image::load_from_memory(&packet.data).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (8, 8));
}

#[test]
fn publishing_without_subscribers_is_harmless() {
    let bus = Arc::new(FrameBus::new(1));
    let publisher: Arc<dyn Publisher> = bus;
    publisher.publish_detection(&detection());
    publisher.publish_annotated_frame(Camera::Forward, 0, &RgbImage::new(2, 2));
}

#[test]
fn detections_serialize_as_json() {
    let line = detection_json(&detection()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["class_name"], "gate");
    assert_eq!(value["camera"], "forward");
    assert_eq!(value["rotation_degrees"], 90.0);
}
