use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Recipient};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::collections;
use crate::models::{Role, ScheduleDay};
use crate::AppState;

static NEXT_SESSION_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Message)]
#[rtype(result = "()")]
struct WsMessage(pub String);

#[derive(Message)]
#[rtype(result = "()")]
struct Connect {
    barangay_id: i32,
    session_id: usize,
    addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
struct Disconnect {
    barangay_id: i32,
    session_id: usize,
}

/// Pushes an event to every resident session in one barangay.
#[derive(Message)]
#[rtype(result = "()")]
pub struct NotifyBarangay {
    pub barangay_id: i32,
    pub event: CollectionEvent,
}

#[derive(Clone, Debug, Serialize)]
pub struct CollectionEvent {
    pub event: &'static str,
    pub data: ScheduleDay,
}

impl CollectionEvent {
    pub fn status_updated(day: ScheduleDay) -> Self {
        Self {
            event: "collection.status_updated",
            data: day,
        }
    }
}

/// Resident sessions grouped by barangay.
#[derive(Default)]
pub struct CollectionHub {
    sessions: HashMap<i32, HashMap<usize, Recipient<WsMessage>>>,
}

impl CollectionHub {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actor for CollectionHub {
    type Context = actix::Context<Self>;
}

impl Handler<Connect> for CollectionHub {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Self::Context) -> Self::Result {
        self.sessions
            .entry(msg.barangay_id)
            .or_default()
            .insert(msg.session_id, msg.addr);
    }
}

impl Handler<Disconnect> for CollectionHub {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Self::Context) -> Self::Result {
        if let Some(sessions) = self.sessions.get_mut(&msg.barangay_id) {
            sessions.remove(&msg.session_id);
            if sessions.is_empty() {
                self.sessions.remove(&msg.barangay_id);
            }
        }
    }
}

impl Handler<NotifyBarangay> for CollectionHub {
    type Result = ();

    fn handle(&mut self, msg: NotifyBarangay, _: &mut Self::Context) -> Self::Result {
        let Some(sessions) = self.sessions.get(&msg.barangay_id) else {
            return;
        };
        match serde_json::to_string(&msg.event) {
            Ok(payload) => {
                for addr in sessions.values() {
                    addr.do_send(WsMessage(payload.clone()));
                }
            }
            Err(e) => log::error!("ws event serialize error: {e}"),
        }
    }
}

struct WsSession {
    barangay_id: i32,
    session_id: usize,
    hub: actix::Addr<CollectionHub>,
}

impl WsSession {
    fn new(barangay_id: i32, hub: actix::Addr<CollectionHub>) -> Self {
        Self {
            barangay_id,
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            hub,
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hub.do_send(Connect {
            barangay_id: self.barangay_id,
            session_id: self.session_id,
            addr: ctx.address().recipient(),
        });
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        self.hub.do_send(Disconnect {
            barangay_id: self.barangay_id,
            session_id: self.session_id,
        });
    }
}

impl Handler<WsMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, ctx: &mut Self::Context) -> Self::Result {
        ctx.text(msg.0);
    }
}

impl actix::StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(_) => ctx.stop(),
        }
    }
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

/// Residents subscribe to live collection status for their barangay.
#[get("/ws/collections")]
pub async fn collections_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let token = serde_urlencoded::from_str::<WsQuery>(req.query_string())
        .ok()
        .map(|q| q.token)
        .filter(|t| !t.is_empty());

    let Some(token) = token else {
        return Err(actix_web::error::ErrorUnauthorized("Missing token"));
    };

    let user = state
        .jwt
        .verify(&token)
        .ok_or_else(|| actix_web::error::ErrorUnauthorized("Invalid token"))?;
    if user.role != Role::Resident {
        return Err(actix_web::error::ErrorForbidden("residents only"));
    }

    let barangay_id = collections::resident_barangay(&state.pool, user.id)
        .await
        .map_err(|e| {
            log::error!("ws barangay lookup error: {e}");
            actix_web::error::ErrorInternalServerError("internal server error")
        })?
        .ok_or_else(|| actix_web::error::ErrorBadRequest("no address on file"))?;

    ws::start(WsSession::new(barangay_id, state.ws_hub.clone()), &req, stream)
}
