use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use clap::Parser;

use serde_json::{Value, json};

use tracing::{error, info};

use wotkit::affordance::{ActionAffordance, EventAffordance, PropertyAffordance};
use wotkit::schema::DataSchema;
use wotkit::thing::Thing;

use wotkit_servient::coap::{CoapServer, DEFAULT_PORT};
use wotkit_servient::error::{Error, Result};
use wotkit_servient::servient::Servient;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address.
    #[arg(long, default_value = "0.0.0.0")]
    address: IpAddr,

    /// Server port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address written into the forms of the Thing Description.
    #[arg(long)]
    advertise: Vec<IpAddr>,

    /// Seconds between two temperature readings.
    #[arg(long, default_value_t = 5)]
    interval: u64,
}

fn lamp() -> Thing {
    Thing::new("Lamp 1")
        .description("A dimmable lamp")
        .property(
            "on",
            PropertyAffordance::new(DataSchema::boolean().title("Powered")).observable(),
        )
        .property(
            "brightness",
            PropertyAffordance::new(DataSchema::integer().minimum(0.).maximum(100.).unit("%"))
                .observable(),
        )
        .property(
            "temperature",
            PropertyAffordance::new(DataSchema::integer().unit("°C"))
                .read_only()
                .observable(),
        )
        .action(
            "toggle",
            ActionAffordance::new().output(DataSchema::boolean()),
        )
        .event(
            "overheat",
            EventAffordance::new().data(DataSchema::integer().unit("°C")),
        )
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let server = cli
        .advertise
        .iter()
        .fold(CoapServer::new().address(cli.address).port(cli.port), |server, address| {
            server.advertise(*address)
        });
    let servient = Servient::new().server(server).start().await?;

    let thing = servient.produce(lamp());

    let on = Arc::new(AtomicBool::new(false));
    let brightness = Arc::new(AtomicI64::new(100));
    let temperature = Arc::new(AtomicI64::new(20));

    let state = Arc::clone(&on);
    thing.set_property_read_handler("on", move |_| {
        let value = state.load(Ordering::SeqCst);
        async move { Ok(Value::Bool(value)) }
    })?;
    let state = Arc::clone(&on);
    thing.set_property_write_handler("on", move |value, _| {
        let state = Arc::clone(&state);
        async move {
            let Some(value) = value.as_bool() else {
                return Err(Error::handler("`on` expects a boolean"));
            };
            state.store(value, Ordering::SeqCst);
            Ok(())
        }
    })?;

    let state = Arc::clone(&brightness);
    thing.set_property_read_handler("brightness", move |_| {
        let value = state.load(Ordering::SeqCst);
        async move { Ok(json!(value)) }
    })?;
    let state = Arc::clone(&brightness);
    thing.set_property_write_handler("brightness", move |value, _| {
        let state = Arc::clone(&state);
        async move {
            match value.as_i64() {
                Some(value @ 0..=100) => {
                    state.store(value, Ordering::SeqCst);
                    Ok(())
                }
                _ => Err(Error::handler("`brightness` expects an integer in 0..=100")),
            }
        }
    })?;

    let state = Arc::clone(&temperature);
    thing.set_property_read_handler("temperature", move |_| {
        let value = state.load(Ordering::SeqCst);
        async move { Ok(json!(value)) }
    })?;

    let state = Arc::clone(&on);
    thing.set_action_handler("toggle", move |_, _| {
        let value = !state.fetch_xor(true, Ordering::SeqCst);
        async move { Ok(Some(Value::Bool(value))) }
    })?;

    thing.expose().await?;
    info!("{}", thing.description_json()?);

    // Simulated temperature readings.
    let sensor = Arc::clone(&thing);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cli.interval));
        loop {
            interval.tick().await;
            let delta = if on.load(Ordering::SeqCst) { 3 } else { -2 };
            let value = (temperature.load(Ordering::SeqCst) + delta).clamp(20, 90);
            temperature.store(value, Ordering::SeqCst);

            if let Err(e) = sensor.emit_property_change("temperature").await {
                error!("Cannot notify the temperature: {e}");
            }
            if value >= 80
                && let Err(e) = sensor.emit_event("overheat", &json!(value))
            {
                error!("Cannot notify an overheat: {e}");
            }
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for shutdown: {e}");
    }

    thing.destroy().await?;
    servient.shutdown().await
}
