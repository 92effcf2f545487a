use camhal::{
    BufferId, BufferMode, CameraAdapter, Command, Frame, FrameCompletion, FrameObserver,
    FrameType, MessageMask, Notification, OpStatus, Pipeline, Result, SubscriberId, YuvPlanes,
};
use std::sync::Arc;

struct Stub;

impl Pipeline for Stub {
    fn start_preview(&self) -> Result<OpStatus> {
        Ok(OpStatus::Done)
    }

    fn stop_preview(&self) -> Result<OpStatus> {
        Ok(OpStatus::Done)
    }

    fn use_buffers(
        &self,
        _mode: BufferMode,
        _buffers: &[BufferId],
        _length: usize,
        _queueable: usize,
    ) -> Result<OpStatus> {
        Ok(OpStatus::Done)
    }

    fn fill_this_buffer(&self, id: BufferId, _frame_type: FrameType) -> Result<()> {
        println!("buffer {} back with the pipeline", id);
        Ok(())
    }

    fn frame_size(&self) -> Result<(u32, u32)> {
        Ok((640, 480))
    }
}

struct Display;

impl FrameObserver for Display {
    fn on_frame(&self, frame: Frame) {
        println!(
            "frame {} {:?} {}x{} at {}ns",
            frame.id, frame.frame_type, frame.width, frame.height, frame.timestamp_ns
        );
    }
}

fn main() {
    env_logger::init();

    let adapter = CameraAdapter::new(Arc::new(Stub));
    adapter.enable_messages(
        MessageMask::PREVIEW_FRAME,
        SubscriberId(1),
        Some(Arc::new(Display)),
        None,
    );

    let buffers: Vec<BufferId> = (0..4).map(BufferId).collect();
    for &id in &buffers {
        adapter.add_frame_pointers(id, YuvPlanes::default());
    }
    adapter
        .send_command(Command::UseBuffers {
            mode: BufferMode::Preview,
            buffers,
            length: 640 * 480 * 3 / 2,
            queueable: 4,
        })
        .unwrap();
    adapter.send_command(Command::StartPreview).unwrap();

    // the pipeline's driver thread would report through the sink
    let sink = adapter.notification_sink();
    for id in 0..4u32 {
        sink.notify(Notification::FrameComplete(FrameCompletion {
            id: BufferId(id),
            mask: FrameType::PREVIEW,
            width: 640,
            height: 480,
            stride: 640,
            offset: 0,
            timestamp_ns: i64::from(id) * 33_333_333,
        }));
        adapter.return_frame(BufferId(id), FrameType::PREVIEW);
    }

    adapter.send_command(Command::StopPreview).unwrap();
    println!("final state {:?}", adapter.state());
}
