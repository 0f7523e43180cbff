use connector_protocol::{ChannelMessage, PortEnd};

/// Which side ended a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Page,
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSummary {
    pub to_service: usize,
    pub to_page: usize,
    pub dropped: usize,
    pub closed_by: ClosedBy,
}

/// Forward messages between a page port and its service port until either
/// side closes; both ends are dropped on return, which closes the other side.
///
/// Page → service: connect requests (url replaced by `origin`) and RPC requests.
/// Service → page: connected replies and RPC responses. Anything else is dropped.
pub async fn bridge(mut page: PortEnd, mut service: PortEnd, origin: &str) -> BridgeSummary {
    let mut to_service = 0;
    let mut to_page = 0;
    let mut dropped = 0;

    let closed_by = loop {
        tokio::select! {
            message = page.recv() => {
                let Some(message) = message else { break ClosedBy::Page };
                match message {
                    ChannelMessage::ConnectRequest(mut request) => {
                        if request.url != origin {
                            tracing::debug!(claimed = %request.url, %origin, "replacing page-supplied url");
                        }
                        request.url = origin.to_string();
                        if service.send(ChannelMessage::ConnectRequest(request)).is_err() {
                            break ClosedBy::Service;
                        }
                        to_service += 1;
                    }
                    ChannelMessage::RpcRequest(request) => {
                        if service.send(ChannelMessage::RpcRequest(request)).is_err() {
                            break ClosedBy::Service;
                        }
                        to_service += 1;
                    }
                    other => {
                        tracing::warn!(kind = %other.kind(), %origin, "dropping message from page");
                        dropped += 1;
                    }
                }
            }
            message = service.recv() => {
                let Some(message) = message else { break ClosedBy::Service };
                match message {
                    ChannelMessage::Connected(_) | ChannelMessage::RpcResponse(_) => {
                        if page.send(message).is_err() {
                            break ClosedBy::Page;
                        }
                        to_page += 1;
                    }
                    other => {
                        tracing::warn!(kind = %other.kind(), %origin, "dropping message from service");
                        dropped += 1;
                    }
                }
            }
        }
    };

    BridgeSummary {
        to_service,
        to_page,
        dropped,
        closed_by,
    }
}
