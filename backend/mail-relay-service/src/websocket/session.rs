use actix::{
    Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, Recipient, StreamHandler,
};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{ChannelRegistry, MailEvent, SubscriberId};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Serialized frame forwarded from the registry to the socket
#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct Outbound(pub String);

/// Drain the registry receiver into the session mailbox until either side
/// goes away. `do_send` ignores mailbox capacity so bursts are queued, not lost.
pub async fn forward_frames(mut rx: UnboundedReceiver<String>, session: Recipient<Outbound>) {
    while let Some(payload) = rx.recv().await {
        if !session.connected() {
            break;
        }
        session.do_send(Outbound(payload));
    }
}

/// One live websocket bound to a user's mail channel
pub struct MailSession {
    user_id: Uuid,
    subscriber_id: SubscriberId,
    registry: ChannelRegistry,
    rx: Option<UnboundedReceiver<String>>,
    hb: Instant,
}

impl MailSession {
    pub fn new(
        user_id: Uuid,
        subscriber_id: SubscriberId,
        registry: ChannelRegistry,
        rx: UnboundedReceiver<String>,
    ) -> Self {
        Self {
            user_id,
            subscriber_id,
            registry,
            rx: Some(rx),
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!(user_id = %act.user_id, "websocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_event(ctx: &mut ws::WebsocketContext<Self>, event: &MailEvent) {
        match event.to_json() {
            Ok(json) => ctx.text(json),
            Err(e) => error!(error = %e, "failed to encode mail event"),
        }
    }
}

impl Actor for MailSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(user_id = %self.user_id, "mail websocket session started");

        self.hb(ctx);
        Self::send_event(ctx, &MailEvent::connected(self.user_id));

        // bridge the registry's receiver into the actor mailbox
        if let Some(rx) = self.rx.take() {
            actix::spawn(forward_frames(rx, ctx.address().recipient()));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(user_id = %self.user_id, "mail websocket session stopped");

        let registry = self.registry.clone();
        let user_id = self.user_id;
        let subscriber_id = self.subscriber_id;
        actix::spawn(async move {
            registry.remove_subscriber(user_id, subscriber_id).await;
        });
    }
}

impl Handler<Outbound> for MailSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MailSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match MailEvent::from_json(&text) {
                    Ok(MailEvent::Ping { .. }) => Self::send_event(ctx, &MailEvent::pong()),
                    Ok(_) => {
                        Self::send_event(
                            ctx,
                            &MailEvent::error("UNSUPPORTED_FRAME", "only ping is accepted"),
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to parse websocket frame");
                        Self::send_event(ctx, &MailEvent::error("BAD_FRAME", "invalid json"));
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("binary websocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(error = %e, "websocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}
