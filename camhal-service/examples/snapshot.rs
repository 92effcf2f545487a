use camhal::{
    BufferId, BufferMode, CameraAdapter, Frame, FrameCompletion, FrameObserver, FrameType,
    MessageMask, Notification, OpStatus, Pipeline, Result, SubscriberId,
};
use camhal_service::{CameraHal, HeapMemoryManager};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Stub {
    preview: Mutex<Vec<BufferId>>,
    image: Mutex<Vec<BufferId>>,
}

impl Pipeline for Stub {
    fn start_preview(&self) -> Result<OpStatus> {
        Ok(OpStatus::Done)
    }

    fn stop_preview(&self) -> Result<OpStatus> {
        Ok(OpStatus::Done)
    }

    fn take_picture(&self) -> Result<OpStatus> {
        Ok(OpStatus::Pending)
    }

    fn stop_image_capture(&self) -> Result<OpStatus> {
        Ok(OpStatus::Done)
    }

    fn use_buffers(
        &self,
        mode: BufferMode,
        buffers: &[BufferId],
        _length: usize,
        _queueable: usize,
    ) -> Result<OpStatus> {
        match mode {
            BufferMode::Preview => *self.preview.lock().unwrap() = buffers.to_vec(),
            BufferMode::ImageCapture => *self.image.lock().unwrap() = buffers.to_vec(),
            _ => (),
        }
        Ok(OpStatus::Done)
    }

    fn fill_this_buffer(&self, id: BufferId, _frame_type: FrameType) -> Result<()> {
        println!("buffer {} back with the pipeline", id);
        Ok(())
    }

    fn frame_size(&self) -> Result<(u32, u32)> {
        Ok((640, 480))
    }

    fn picture_buffer_size(&self, count: usize) -> Result<usize> {
        Ok(count * 640 * 480 * 3 / 2)
    }
}

struct Printer(&'static str);

impl FrameObserver for Printer {
    fn on_frame(&self, frame: Frame) {
        println!("{}: frame {} {:?}", self.0, frame.id, frame.frame_type);
    }
}

fn completion(id: BufferId, mask: FrameType) -> Notification {
    Notification::FrameComplete(FrameCompletion {
        id,
        mask,
        width: 640,
        height: 480,
        stride: 640,
        offset: 0,
        timestamp_ns: 33_333_333,
    })
}

fn main() {
    env_logger::init();

    let pipeline = Arc::new(Stub::default());
    let adapter = CameraAdapter::new(pipeline.clone());
    let sink = adapter.notification_sink();
    let hal = CameraHal::new(adapter, Arc::new(HeapMemoryManager::new()));

    hal.enable_messages(
        MessageMask::PREVIEW_FRAME,
        SubscriberId(1),
        Some(Arc::new(Printer("display"))),
        None,
    );
    hal.enable_messages(
        MessageMask::IMAGE_FRAME,
        SubscriberId(2),
        Some(Arc::new(Printer("jpeg"))),
        None,
    );
    hal.adapter()
        .register_image_release_callback(Box::new(|id| println!("image buffer {} released", id)));

    hal.start_preview().unwrap();
    println!("previewing in {:?}", hal.adapter().state());

    let preview = pipeline.preview.lock().unwrap()[0];
    sink.notify(completion(preview, FrameType::PREVIEW));
    hal.return_frame(preview, FrameType::PREVIEW);

    hal.take_picture().unwrap();
    let image = pipeline.image.lock().unwrap()[0];
    sink.notify(completion(image, FrameType::IMAGE));
    hal.return_frame(image, FrameType::IMAGE);

    hal.stop_image_capture().unwrap();
    hal.stop_preview().unwrap();
    println!("final state {:?}", hal.adapter().state());
}
