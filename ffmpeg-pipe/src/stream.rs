//! Async views over the pipeline callbacks.

use std::pin::Pin;

use futures::{Stream, StreamExt, future};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::decode_pipeline::DecodePipeline;
use crate::encode_pipeline::EncodePipeline;
use crate::frame::Frame;
use crate::lifecycle::Shutdown;
use crate::packet::EncodedPacket;

pub type PacketStream = Pin<Box<dyn Stream<Item = anyhow::Result<EncodedPacket>> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = anyhow::Result<(u64, Frame)>> + Send>>;

enum StreamCmd<T> {
    Data(T),
    Aborted(anyhow::Error),
    Eof,
}

fn shutdown_cmds<T>(shutdown: &Shutdown) -> Vec<StreamCmd<T>> {
    match shutdown {
        Shutdown::Completed => vec![StreamCmd::Eof],
        Shutdown::Aborted(err) => vec![
            StreamCmd::Aborted(anyhow::anyhow!("{:#}", err)),
            StreamCmd::Eof,
        ],
    }
}

fn into_stream<T: Send + 'static>(
    rx: tokio::sync::mpsc::UnboundedReceiver<StreamCmd<T>>,
) -> impl Stream<Item = anyhow::Result<T>> + Send {
    UnboundedReceiverStream::new(rx)
        .take_while(|cmd| future::ready(!matches!(cmd, StreamCmd::Eof)))
        .filter_map(|cmd| {
            future::ready(match cmd {
                StreamCmd::Data(item) => Some(Ok(item)),
                StreamCmd::Aborted(err) => Some(Err(err)),
                StreamCmd::Eof => None,
            })
        })
}

/// Every packet of the next run as an owned copy. The stream ends after the
/// close callback; an aborted run yields its error as the last item.
///
/// Replaces the pipeline's write and close callbacks.
pub fn packet_stream(pipeline: &EncodePipeline) -> PacketStream {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let data_tx = tx.clone();
    pipeline.set_write_callback(move |packet| {
        let _ = data_tx.send(StreamCmd::Data(EncodedPacket::from(packet)));
    });
    pipeline.set_close_callback(move |shutdown| {
        for cmd in shutdown_cmds(shutdown) {
            let _ = tx.send(cmd);
        }
    });

    Box::pin(into_stream(rx))
}

/// Every decoded frame of the next run with its index. Ends after the close
/// callback.
///
/// Replaces the pipeline's frame and close callbacks.
pub fn frame_stream(pipeline: &DecodePipeline) -> FrameStream {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let data_tx = tx.clone();
    pipeline.set_frame_callback(move |frame, index| {
        let _ = data_tx.send(StreamCmd::Data((index, frame.clone())));
    });
    pipeline.set_close_callback(move |shutdown| {
        for cmd in shutdown_cmds(shutdown) {
            let _ = tx.send(cmd);
        }
    });

    Box::pin(into_stream(rx))
}
