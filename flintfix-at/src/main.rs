use clap::{Parser, ValueHint};
use flintfix::fix::generated::{self, MsgType, Tags};
use flintfix::fix::message::{Item, Message};
use flintfix::fix::value::Value;
use flintfix::{
    fix, Authenticator, FixAcceptor, FixInitiator, LogonRequest, SessionHandle, SessionSettings,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
    let seconds = s.parse()?;
    Ok(Duration::from_secs(seconds))
}

#[derive(Parser, Clone)]
#[command(author, version, about, long_about = None)]
struct Opts {
    /// SenderCompID
    #[arg(short, long)]
    sender_comp_id: String,

    /// TargetCompID
    #[arg(short, long)]
    target_comp_id: String,

    /// Address to listen on or connect to
    #[arg(short, long)]
    addr: SocketAddr,

    /// Listen (opposite is connect)
    #[arg(short, long)]
    listen: bool,

    /// Location of the message store
    #[arg(short = 'r', long, value_hint = ValueHint::FilePath)]
    store: PathBuf,

    /// Location of log files
    #[arg(short = 'o', long, value_hint = ValueHint::FilePath)]
    log: PathBuf,

    /// Heartbeat interval in seconds
    #[arg(long, default_value = "30", value_parser = parse_duration)]
    heartbeat_timeout: Duration,

    /// Username sent at logon when connecting
    #[arg(short, long)]
    username: Option<String>,

    /// Password sent at logon when connecting
    #[arg(short, long)]
    password: Option<String>,

    /// Reset sequence numbers at logon
    #[arg(long)]
    reset: bool,
}

#[derive(Default)]
struct ApplicationParserCallback<'a> {
    msg_seq_num: u32,
    cl_order_id: Option<&'a [u8]>,
}

impl<'a> fix::decode::ParserCallback<'a> for ApplicationParserCallback<'a> {
    type Err = fix::SessionError;
    fn header(&mut self, key: u32, value: &'a [u8]) -> Result<bool, fix::SessionError> {
        if let Ok(Tags::MsgSeqNum) = key.try_into() {
            self.msg_seq_num = fix::decode::parse_field::<u32>(value).map_err(|_| {
                fix::SessionError::MissingMsgSeqNum {
                    text: String::from("Missing MsgSeqNum"),
                }
            })?;
        }
        Ok(true)
    }
    fn body(&mut self, key: u32, value: &'a [u8]) -> Result<bool, fix::SessionError> {
        if let Ok(Tags::ClOrdID) = key.try_into() {
            self.cl_order_id = Some(value);
        }
        Ok(true)
    }
    fn trailer(&mut self, _key: u32, _value: &'a [u8]) -> Result<bool, fix::SessionError> {
        Ok(false)
    }
    fn sequence_num(&self) -> u32 {
        self.msg_seq_num
    }
}

#[tokio::main]
async fn main() -> Result<(), flintfix::ApplicationError> {
    let opts = Opts::parse();
    let is_server = opts.listen;

    let mut builder = SessionSettings::builder()
        .with_sender_comp_id(opts.sender_comp_id.as_str())
        .with_target_comp_id(opts.target_comp_id.as_str())
        .with_socket_addr(opts.addr)
        .with_store_path(opts.store.clone())
        .with_log_dir(opts.log.clone())
        .with_heartbeat_timeout(opts.heartbeat_timeout)
        .with_reset_seq_num_on_logon(opts.reset);
    if let Some(username) = &opts.username {
        builder.set_username(username);
    }
    if let Some(password) = &opts.password {
        builder.set_password(password);
    }
    if is_server {
        builder.set_heartbeat_limits(1, 120);
        let authenticator: Authenticator = Arc::new(|request: &LogonRequest| {
            println!(
                "peer '{}' logging on as user {:?}",
                request.sender_comp_id, request.username
            );
            Ok(())
        });
        builder.set_authenticator(authenticator);
    }
    let settings = builder.build()?;

    if is_server {
        let mut fix_server = FixAcceptor::build(settings)?;

        loop {
            let (fix_handle, mut event_receiver) = fix_server.accept().await?;
            let h = tokio::spawn(async move {
                let _ = fix_handle.start_async().await;
                while let Some(msg) = event_receiver.recv().await {
                    let mut cb: ApplicationParserCallback = Default::default();
                    if fix::decode::parse(&msg.as_ref()[..], &mut cb).is_err() {
                        continue;
                    }
                    // acknowledge every order with a stub execution report
                    let report = execution_report(cb.cl_order_id.unwrap_or(b"NONE"));
                    let _ = fix_handle.send_message(report);
                }
            });
            let _ = h.await;
        }
    } else {
        let (fix_handle, mut event_receiver) = FixInitiator::build(settings)?.initiate().await?;

        tokio::spawn(async move {
            while let Some(msg) = event_receiver.recv().await {
                println!("got an application message: {}", msg);
            }
        });

        fix_handle.start_async().await?;

        send_order(&fix_handle, "ID1", 100, "AAPL", "189.20", true).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        send_order(&fix_handle, "ID2", 250, "MSFT", "402.75", false).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        fix_handle.end_async().await?;
    }

    Ok(())
}

async fn send_order(
    fix_handle: &SessionHandle,
    cl_ord_id: &str,
    qty: u32,
    symbol: &str,
    price: &str,
    is_buy: bool,
) -> Result<(), flintfix::ApplicationError> {
    let side = if is_buy {
        generated::Side::BUY
    } else {
        generated::Side::SELL
    };

    let mut msg = Message::standard(&fix_handle.begin_string(), MsgType::ORDER_SINGLE.into());
    msg.set_body(vec![
        Item::field(Tags::ClOrdID, Value::str(cl_ord_id)),
        Item::field(Tags::HandlInst, Value::str("1")),
        Item::field(Tags::OrderQty, Value::uint(qty as u64)),
        Item::field(Tags::OrdType, Value::str(char::from(generated::OrdType::LIMIT))),
        Item::field(Tags::Price, Value::str(price)),
        Item::field(Tags::Side, Value::str(char::from(side))),
        Item::field(Tags::Symbol, Value::str(symbol)),
        Item::field(
            Tags::TimeInForce,
            Value::str(char::from(generated::TimeInForce::IMMEDIATE_OR_CANCEL)),
        ),
        Item::field(Tags::TransactTime, Value::time(Utc::now())),
    ]);

    fix_handle.send_message_async(msg).await
}

fn execution_report(cl_ord_id: &[u8]) -> Message {
    let mut msg = Message::standard("FIX.4.4", MsgType::EXECUTION_REPORT.into());
    msg.set_body(vec![
        Item::field(Tags::OrderID, Value::str("1")),
        Item::field(Tags::ExecID, Value::str("1")),
        Item::field(
            Tags::ExecType,
            Value::str(char::from(generated::ExecType::NEW)),
        ),
        Item::field(
            Tags::OrdStatus,
            Value::str(char::from(generated::OrdStatus::NEW)),
        ),
        Item::field(
            Tags::ClOrdID,
            Value::str(String::from_utf8_lossy(cl_ord_id).into_owned()),
        ),
        Item::field(Tags::Symbol, Value::str("AAPL")),
        Item::field(Tags::Side, Value::str(char::from(generated::Side::BUY))),
        Item::field(Tags::LeavesQty, Value::float(0.0)),
        Item::field(Tags::CumQty, Value::float(0.0)),
        Item::field(Tags::AvgPx, Value::float(0.0)),
    ]);
    msg
}
