//! Newline-delimited JSON protocol. One request object per line, one
//! response line per request, plus unsolicited `notification` lines for
//! ledgers the connection listens on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::auth::AuthSource;
use crate::engine::{DefaultResourcePolicy, Engine, EngineError, NewBooking, calendar};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability;
use crate::payment::{self, PaymentEvent, PaymentOutcome};
use crate::tenant::TenantManager;

const CHANNEL_PREFIX: &str = "ledger_";
const NOTIFICATION_BUFFER: usize = 256;

fn default_true() -> bool {
    true
}

fn default_status() -> BookingStatus {
    BookingStatus::Pending
}

/// Every operation a client can send. Ids marked optional are generated when
/// omitted and echoed back in the response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Startup {
        database: String,
        #[serde(default)]
        password: String,
    },
    CreateBusiness {
        id: Option<Ulid>,
        name: String,
        #[serde(default)]
        tz_offset_minutes: i32,
        #[serde(default)]
        requires_staff: bool,
        #[serde(default)]
        requires_location: bool,
    },
    DeleteBusiness {
        id: Ulid,
    },
    GetBusiness {
        id: Ulid,
    },
    AddLocation {
        id: Option<Ulid>,
        business_id: Ulid,
        name: String,
    },
    RemoveLocation {
        id: Ulid,
    },
    ListLocations {
        business_id: Ulid,
    },
    UpsertService {
        id: Option<Ulid>,
        business_id: Ulid,
        name: String,
        price_cents: Option<i64>,
        duration_minutes: Option<u32>,
        #[serde(default = "default_true")]
        active: bool,
    },
    RemoveService {
        id: Ulid,
    },
    ListServices {
        business_id: Ulid,
    },
    CreateStaff {
        id: Option<Ulid>,
        business_id: Ulid,
        name: String,
    },
    DeleteStaff {
        id: Ulid,
    },
    ListStaff {
        business_id: Ulid,
    },
    AddRule {
        id: Option<Ulid>,
        staff_member_id: Ulid,
        weekday: u8,
        from_minute: u16,
        to_minute: u16,
    },
    RemoveRule {
        id: Ulid,
    },
    ListRules {
        staff_member_id: Ulid,
    },
    AddBlackout {
        id: Option<Ulid>,
        staff_member_id: Ulid,
        start: Ms,
        end: Ms,
        reason: Option<String>,
    },
    RemoveBlackout {
        id: Ulid,
    },
    ListBlackouts {
        staff_member_id: Ulid,
    },
    /// `date` is `YYYY-MM-DD` in the business's local time.
    FindSlots {
        staff_member_id: Ulid,
        service_id: Ulid,
        date: String,
        location_id: Option<Ulid>,
    },
    FreeWindows {
        staff_member_id: Ulid,
        date: String,
    },
    CreateBooking {
        id: Option<Ulid>,
        business_id: Ulid,
        staff_member_id: Option<Ulid>,
        location_id: Option<Ulid>,
        user_id: Ulid,
        #[serde(default)]
        customer_name: String,
        start: Option<Ms>,
        end: Option<Ms>,
        #[serde(default)]
        service_ids: Vec<Ulid>,
        #[serde(default = "default_status")]
        status: BookingStatus,
        #[serde(default)]
        policy: DefaultResourcePolicy,
    },
    TransitionBooking {
        id: Ulid,
        to: BookingStatus,
    },
    RescheduleBooking {
        id: Ulid,
        start: Ms,
    },
    AddBookingItem {
        id: Ulid,
        service_id: Ulid,
    },
    PaymentEvent {
        booking_id: Ulid,
        outcome: PaymentOutcome,
        reference: Option<String>,
    },
    GetBooking {
        id: Ulid,
    },
    /// `ledger_id` is a staff member id, or a business id for its pool.
    ListBookings {
        ledger_id: Ulid,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

#[derive(Debug)]
pub enum WireError {
    Codec(LinesCodecError),
    BadRequest(String),
    NotStarted,
    AuthFailed,
    Tenant(String),
    Engine(EngineError),
    Encode(serde_json::Error),
}

impl WireError {
    pub fn code(&self) -> &'static str {
        match self {
            WireError::Codec(LinesCodecError::MaxLineLengthExceeded) => "line_too_long",
            WireError::Codec(_) => "io_error",
            WireError::BadRequest(_) => "bad_request",
            WireError::NotStarted => "not_started",
            WireError::AuthFailed => "auth_failed",
            WireError::Tenant(_) => "tenant_unavailable",
            WireError::Engine(e) => e.code(),
            WireError::Encode(_) => "encode_error",
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            WireError::Codec(LinesCodecError::MaxLineLengthExceeded)
            | WireError::BadRequest(_)
            | WireError::NotStarted => "input",
            WireError::AuthFailed => "auth",
            WireError::Engine(e) => e.class().as_str(),
            WireError::Codec(_) | WireError::Tenant(_) | WireError::Encode(_) => "internal",
        }
    }

    fn body(&self) -> Value {
        json!({
            "ok": false,
            "error": {
                "code": self.code(),
                "class": self.class(),
                "message": self.to_string(),
            }
        })
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Codec(e) => write!(f, "codec error: {e}"),
            WireError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            WireError::NotStarted => write!(f, "first request must be startup"),
            WireError::AuthFailed => write!(f, "password authentication failed"),
            WireError::Tenant(msg) => write!(f, "tenant error: {msg}"),
            WireError::Engine(e) => write!(f, "{e}"),
            WireError::Encode(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<EngineError> for WireError {
    fn from(e: EngineError) -> Self {
        WireError::Engine(e)
    }
}

impl From<LinesCodecError> for WireError {
    fn from(e: LinesCodecError) -> Self {
        WireError::Codec(e)
    }
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Encode(e)
    }
}

pub fn parse_request(line: &str) -> Result<Request, WireError> {
    serde_json::from_str(line).map_err(|e| WireError::BadRequest(e.to_string()))
}

fn parse_channel(channel: &str) -> Result<Ulid, WireError> {
    let id = channel.strip_prefix(CHANNEL_PREFIX).ok_or_else(|| {
        WireError::BadRequest(format!(
            "invalid channel: {channel} (expected {CHANNEL_PREFIX}{{id}})"
        ))
    })?;
    Ulid::from_string(id).map_err(|e| WireError::BadRequest(format!("bad ULID in channel: {e}")))
}

fn parse_day(date: &str) -> Result<chrono::NaiveDate, WireError> {
    calendar::parse_date(date)
        .ok_or_else(|| WireError::BadRequest(format!("invalid date: {date} (expected YYYY-MM-DD)")))
}

fn ok_line(data: Value) -> String {
    json!({ "ok": true, "data": data }).to_string()
}

fn notification_line(ledger_id: Ulid, event: &Event) -> Result<String, WireError> {
    Ok(json!({
        "notification": {
            "channel": format!("{CHANNEL_PREFIX}{ledger_id}"),
            "event": serde_json::to_value(event)?,
        }
    })
    .to_string())
}

/// Run one engine operation and encode its result.
pub async fn dispatch(engine: &Engine, req: Request) -> Result<Value, WireError> {
    let value = match req {
        Request::CreateBusiness {
            id,
            name,
            tz_offset_minutes,
            requires_staff,
            requires_location,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            let default_staff = engine
                .create_business(id, name, tz_offset_minutes, requires_staff, requires_location)
                .await?;
            json!({ "id": id, "default_staff_member_id": default_staff })
        }
        Request::DeleteBusiness { id } => {
            engine.delete_business(id).await?;
            json!({ "id": id })
        }
        Request::GetBusiness { id } => serde_json::to_value(engine.get_business(id)?)?,
        Request::AddLocation {
            id,
            business_id,
            name,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.add_location(id, business_id, name).await?;
            json!({ "id": id })
        }
        Request::RemoveLocation { id } => {
            engine.remove_location(id).await?;
            json!({ "id": id })
        }
        Request::ListLocations { business_id } => {
            serde_json::to_value(engine.list_locations(business_id)?)?
        }
        Request::UpsertService {
            id,
            business_id,
            name,
            price_cents,
            duration_minutes,
            active,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine
                .upsert_service(Service {
                    id,
                    business_id,
                    name,
                    price_cents,
                    duration_minutes,
                    active,
                })
                .await?;
            json!({ "id": id })
        }
        Request::RemoveService { id } => {
            engine.remove_service(id).await?;
            json!({ "id": id })
        }
        Request::ListServices { business_id } => {
            serde_json::to_value(engine.list_services(business_id)?)?
        }
        Request::CreateStaff {
            id,
            business_id,
            name,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine.create_staff(id, business_id, name).await?;
            json!({ "id": id })
        }
        Request::DeleteStaff { id } => {
            engine.delete_staff(id).await?;
            json!({ "id": id })
        }
        Request::ListStaff { business_id } => {
            serde_json::to_value(engine.list_staff(business_id).await?)?
        }
        Request::AddRule {
            id,
            staff_member_id,
            weekday,
            from_minute,
            to_minute,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine
                .add_rule(AvailabilityRule {
                    id,
                    staff_member_id,
                    weekday,
                    from_minute,
                    to_minute,
                })
                .await?;
            json!({ "id": id })
        }
        Request::RemoveRule { id } => {
            let staff = engine.remove_rule(id).await?;
            json!({ "id": id, "staff_member_id": staff })
        }
        Request::ListRules { staff_member_id } => {
            serde_json::to_value(engine.list_rules(staff_member_id).await?)?
        }
        Request::AddBlackout {
            id,
            staff_member_id,
            start,
            end,
            reason,
        } => {
            let id = id.unwrap_or_else(Ulid::new);
            engine
                .add_blackout(id, staff_member_id, start, end, reason)
                .await?;
            json!({ "id": id })
        }
        Request::RemoveBlackout { id } => {
            let staff = engine.remove_blackout(id).await?;
            json!({ "id": id, "staff_member_id": staff })
        }
        Request::ListBlackouts { staff_member_id } => {
            serde_json::to_value(engine.list_blackouts(staff_member_id).await?)?
        }
        Request::FindSlots {
            staff_member_id,
            service_id,
            date,
            location_id,
        } => {
            let day = parse_day(&date)?;
            let slots = engine
                .find_slots_local(staff_member_id, service_id, day, location_id)
                .await?;
            json!({ "slots": slots })
        }
        Request::FreeWindows {
            staff_member_id,
            date,
        } => {
            let day = parse_day(&date)?;
            let windows = engine.free_windows_local(staff_member_id, day).await?;
            json!({ "windows": windows })
        }
        Request::CreateBooking {
            id,
            business_id,
            staff_member_id,
            location_id,
            user_id,
            customer_name,
            start,
            end,
            service_ids,
            status,
            policy,
        } => {
            let input = NewBooking {
                id: id.unwrap_or_else(Ulid::new),
                business_id,
                staff_member_id,
                location_id,
                user_id,
                customer_name,
                start,
                end,
                service_ids,
                status,
            };
            serde_json::to_value(engine.create_booking(input, policy).await?)?
        }
        Request::TransitionBooking { id, to } => {
            serde_json::to_value(engine.transition_booking(id, to).await?)?
        }
        Request::RescheduleBooking { id, start } => {
            serde_json::to_value(engine.reschedule_booking(id, start).await?)?
        }
        Request::AddBookingItem { id, service_id } => {
            serde_json::to_value(engine.add_booking_item(id, service_id).await?)?
        }
        Request::PaymentEvent {
            booking_id,
            outcome,
            reference,
        } => {
            let event = PaymentEvent {
                booking_id,
                outcome,
                reference,
            };
            serde_json::to_value(payment::apply_payment_event(engine, &event).await?)?
        }
        Request::GetBooking { id } => serde_json::to_value(engine.get_booking(id).await?)?,
        Request::ListBookings { ledger_id } => {
            serde_json::to_value(engine.list_bookings(ledger_id).await?)?
        }
        Request::Startup { .. } => {
            return Err(WireError::BadRequest("already started".into()));
        }
        Request::Listen { .. } | Request::Unlisten { .. } | Request::UnlistenAll => {
            return Err(WireError::BadRequest("listen is per connection".into()));
        }
    };
    Ok(value)
}

/// Per-connection state after a successful startup.
struct Session {
    engine: Arc<Engine>,
    listeners: HashMap<Ulid, JoinHandle<()>>,
    notify_tx: mpsc::Sender<(Ulid, Event)>,
}

impl Session {
    fn listen(&mut self, ledger_id: Ulid) -> Result<(), WireError> {
        if self.engine.get_ledger(&ledger_id).is_none() {
            return Err(EngineError::NotFound(ledger_id).into());
        }
        if self.listeners.contains_key(&ledger_id) {
            return Ok(());
        }
        let mut rx = self.engine.notify.subscribe(ledger_id);
        let tx = self.notify_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if tx.send((ledger_id, event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("listener on {ledger_id} dropped {n} notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.listeners.insert(ledger_id, task);
        Ok(())
    }

    async fn unlisten(&mut self, ledger_id: Ulid) {
        if let Some(task) = self.listeners.remove(&ledger_id) {
            task.abort();
            let _ = task.await;
            self.engine.notify.release(&ledger_id);
        }
    }

    async fn unlisten_all(&mut self) {
        let ids: Vec<Ulid> = self.listeners.keys().copied().collect();
        for id in ids {
            self.unlisten(id).await;
        }
    }

    async fn handle(&mut self, req: Request) -> Result<Value, WireError> {
        match req {
            Request::Listen { channel } => {
                let id = parse_channel(&channel)?;
                self.listen(id)?;
                Ok(json!({ "listening": channel }))
            }
            Request::Unlisten { channel } => {
                let id = parse_channel(&channel)?;
                self.unlisten(id).await;
                Ok(json!({ "unlistened": channel }))
            }
            Request::UnlistenAll => {
                self.unlisten_all().await;
                Ok(json!({ "unlistened": "*" }))
            }
            other => dispatch(&self.engine, other).await,
        }
    }
}

/// Read the startup line, authenticate, and resolve the tenant's engine.
async fn startup<IO>(
    framed: &mut Framed<IO, LinesCodec>,
    tenants: &TenantManager,
    auth: &dyn AuthSource,
) -> Result<Option<(String, Arc<Engine>)>, WireError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let Some(line) = framed.next().await else {
        return Ok(None);
    };
    let (database, password) = match parse_request(&line?) {
        Ok(Request::Startup { database, password }) => (database, password),
        Ok(_) => return Err(WireError::NotStarted),
        Err(e) => return Err(e),
    };
    if !auth.verify(&database, &password).await {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        return Err(WireError::AuthFailed);
    }
    let engine = tenants
        .get_or_create(&database)
        .map_err(|e| WireError::Tenant(e.to_string()))?;
    Ok(Some((database, engine)))
}

/// Serve one client until it disconnects.
pub async fn process_connection<IO>(
    io: IO,
    tenants: Arc<TenantManager>,
    auth: Arc<dyn AuthSource>,
) -> Result<(), WireError>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    let (database, engine) = match startup(&mut framed, &tenants, auth.as_ref()).await {
        Ok(Some(started)) => started,
        Ok(None) => return Ok(()),
        Err(e) => {
            tracing::info!("startup rejected: {e}");
            framed.send(e.body().to_string()).await?;
            return Err(e);
        }
    };
    framed
        .send(ok_line(json!({ "database": database })))
        .await?;

    let (notify_tx, mut notify_rx) = mpsc::channel(NOTIFICATION_BUFFER);
    let mut session = Session {
        engine,
        listeners: HashMap::new(),
        notify_tx,
    };

    let result = loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    None => break Ok(()),
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let e = WireError::Codec(LinesCodecError::MaxLineLengthExceeded);
                        if let Err(e) = framed.send(e.body().to_string()).await {
                            break Err(e.into());
                        }
                        continue;
                    }
                    Some(Err(e)) => break Err(e.into()),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = serve_line(&mut session, &line).await;
                if let Err(e) = framed.send(reply).await {
                    break Err(e.into());
                }
            }
            Some((ledger_id, event)) = notify_rx.recv() => {
                let line = match notification_line(ledger_id, &event) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!("notification encode failed: {e}");
                        continue;
                    }
                };
                if let Err(e) = framed.send(line).await {
                    break Err(e.into());
                }
            }
        }
    };

    session.unlisten_all().await;
    result
}

/// Handle one request line and produce its response line.
async fn serve_line(session: &mut Session, line: &str) -> String {
    let req = match parse_request(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "unknown", "status" => "error")
                .increment(1);
            return e.body().to_string();
        }
    };
    let op = observability::request_label(&req);
    let started = Instant::now();
    let result = session.handle(req).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(data) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "ok")
                .increment(1);
            ok_line(data)
        }
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "error")
                .increment(1);
            match &e {
                WireError::Engine(inner) => inner.log(op),
                other => tracing::debug!("{op}: {other}"),
            }
            e.body().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticPasswordAuth;
    use std::path::PathBuf;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_wire").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Spawn a server on one end of an in-memory pipe and return the client end.
    fn connect(name: &str) -> Framed<tokio::io::DuplexStream, LinesCodec> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let tenants = Arc::new(TenantManager::new(test_data_dir(name), 1000, None));
        let auth: Arc<dyn AuthSource> = Arc::new(StaticPasswordAuth::new("pw".into()));
        tokio::spawn(async move {
            let _ = process_connection(server, tenants, auth).await;
        });
        Framed::new(client, LinesCodec::new())
    }

    async fn call(client: &mut Framed<tokio::io::DuplexStream, LinesCodec>, req: Value) -> Value {
        client.send(req.to_string()).await.unwrap();
        let line = client.next().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn parse_create_booking_defaults() {
        let req = parse_request(
            r#"{"op":"create_booking","business_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","user_id":"01ARZ3NDEKTSV4RRFFQ69G5FAW","start":1000}"#,
        )
        .unwrap();
        match req {
            Request::CreateBooking {
                id,
                status,
                service_ids,
                policy,
                customer_name,
                ..
            } => {
                assert_eq!(id, None);
                assert_eq!(status, BookingStatus::Pending);
                assert!(service_ids.is_empty());
                assert_eq!(policy, DefaultResourcePolicy::default());
                assert_eq!(customer_name, "");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_unit_variant_and_unknown_op() {
        assert!(matches!(
            parse_request(r#"{"op":"unlisten_all"}"#),
            Ok(Request::UnlistenAll)
        ));
        assert!(matches!(
            parse_request(r#"{"op":"drop_tables"}"#),
            Err(WireError::BadRequest(_))
        ));
        assert!(matches!(parse_request("not json"), Err(WireError::BadRequest(_))));
    }

    #[test]
    fn channel_parsing() {
        let id = Ulid::new();
        assert_eq!(parse_channel(&format!("ledger_{id}")).unwrap(), id);
        assert!(parse_channel(&id.to_string()).is_err());
        assert!(parse_channel("ledger_nope").is_err());
    }

    #[test]
    fn error_body_carries_code_and_class() {
        let body = WireError::from(EngineError::SlotConflict(Ulid::nil())).body();
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["code"], "slot_conflict");
        assert_eq!(body["error"]["class"], "conflict");

        let body = WireError::AuthFailed.body();
        assert_eq!(body["error"]["code"], "auth_failed");
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let mut client = connect("wrong_password");
        let reply = call(&mut client, json!({"op": "startup", "database": "t", "password": "nope"})).await;
        assert_eq!(reply["error"]["code"], "auth_failed");
        // Server hangs up after a failed startup.
        assert!(client.next().await.is_none());
    }

    #[tokio::test]
    async fn request_before_startup_rejected() {
        let mut client = connect("not_started");
        let reply = call(&mut client, json!({"op": "get_booking", "id": Ulid::new()})).await;
        assert_eq!(reply["error"]["code"], "not_started");
    }

    #[tokio::test]
    async fn directory_round_trip() {
        let mut client = connect("directory");
        let reply = call(&mut client, json!({"op": "startup", "database": "t", "password": "pw"})).await;
        assert_eq!(reply["ok"], true);

        let reply = call(
            &mut client,
            json!({"op": "create_business", "name": "Cuts", "tz_offset_minutes": 60}),
        )
        .await;
        assert_eq!(reply["ok"], true);
        let business = reply["data"]["id"].as_str().unwrap().to_string();
        assert!(reply["data"]["default_staff_member_id"].is_string());

        let reply = call(&mut client, json!({"op": "get_business", "id": business})).await;
        assert_eq!(reply["data"]["name"], "Cuts");
        assert_eq!(reply["data"]["tz_offset_minutes"], 60);

        let reply = call(&mut client, json!({"op": "list_staff", "business_id": business})).await;
        assert_eq!(reply["data"].as_array().unwrap().len(), 1);

        let reply = call(
            &mut client,
            json!({"op": "find_slots", "staff_member_id": Ulid::new(), "service_id": Ulid::new(), "date": "2025-03-05"}),
        )
        .await;
        assert_eq!(reply["error"]["code"], "not_found");

        let reply = call(
            &mut client,
            json!({"op": "free_windows", "staff_member_id": Ulid::new(), "date": "05/03/2025"}),
        )
        .await;
        assert_eq!(reply["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn listen_requires_known_ledger() {
        let mut client = connect("listen_unknown");
        call(&mut client, json!({"op": "startup", "database": "t", "password": "pw"})).await;
        let reply = call(
            &mut client,
            json!({"op": "listen", "channel": format!("ledger_{}", Ulid::new())}),
        )
        .await;
        assert_eq!(reply["error"]["code"], "not_found");
        let reply = call(&mut client, json!({"op": "listen", "channel": "bookings"})).await;
        assert_eq!(reply["error"]["code"], "bad_request");
    }
}
