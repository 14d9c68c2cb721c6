//! # TSS Instrument Simulator
//!
//! A stand-in for the remote Telemetry Stream Server, for local development
//! and integration testing of the bridge. Speaks the real wire protocol:
//! 8-byte big-endian request headers in, 8-byte header + NUL-padded JSON
//! datagrams out. Readings drift randomly between requests so downstream
//! consumers see changing data.

use clap::Parser;
use rand::Rng;
use serde_json::{json, Value};
use std::net::UdpSocket;

use lib_common::retrieve::tss_udp::{decode_request, HEADER_SIZE, PACKET_SIZE};

#[derive(Parser, Debug)]
#[clap(about = "Stand-in TSS instrument server emitting canned telemetry.", version)]
struct SimConfig {
    /// UDP port to serve on.
    #[clap(long, env = "TSS_SIM_PORT", default_value_t = 14141)]
    port: u16,
}

fn main() -> anyhow::Result<()> {
    let config = SimConfig::parse();

    let socket = UdpSocket::bind(("0.0.0.0", config.port))?;
    println!("TSS simulator serving on udp://0.0.0.0:{}", config.port);

    let mut buffer = [0u8; PACKET_SIZE];
    loop {
        let (len, peer) = socket.recv_from(&mut buffer)?;
        let Some((_, command)) = decode_request(&buffer[..len]) else {
            eprintln!("Ignoring malformed {} byte request from {}", len, peer);
            continue;
        };

        let document = document_for(command);

        // Echo the request header back as the opaque response header.
        let mut reply = buffer[..HEADER_SIZE].to_vec();
        reply.extend_from_slice(document.to_string().as_bytes());
        reply.resize(PACKET_SIZE, 0);
        socket.send_to(&reply, peer)?;
    }
}

fn document_for(command: u32) -> Value {
    let mut rng = rand::rng();

    match command {
        0 => json!({
            "pr_telemetry": {
                "speed": rng.random_range(0.0..12.0),
                "heading": rng.random_range(0.0..360.0),
                "battery_level": rng.random_range(40.0..100.0),
                "cabin_pressure": rng.random_range(3.9..4.1),
            }
        }),
        1 => json!({
            "telemetry": {
                "eva1": suit_telemetry(&mut rng),
                "eva2": suit_telemetry(&mut rng),
            },
            "dcu": {
                "eva1": dcu_panel(&mut rng),
                "eva2": dcu_panel(&mut rng),
            },
            "imu": {
                "eva1": imu_reading(&mut rng),
                "eva2": imu_reading(&mut rng),
            },
            "status": {"started": true, "primary_oxygen": rng.random_range(60.0..100.0)},
            "error": {"fan_error": false, "oxy_error": false, "pump_error": false},
            "uia": {"eva1_power": true, "eva2_power": true, "depress_pump": false},
        }),
        2 => json!({
            "location": {
                "lat": -26.0 + rng.random_range(-0.01..0.01),
                "lon": 27.5 + rng.random_range(-0.01..0.01),
            },
            "signal": {"strength": rng.random_range(0.0..100.0)},
            "errors": {"throttle": false, "brakes": false},
        }),
        other => json!({"unknown_command": other}),
    }
}

fn suit_telemetry(rng: &mut impl Rng) -> Value {
    json!({
        "heart_rate": rng.random_range(60.0..120.0),
        "suit_pressure_total": rng.random_range(3.9..4.1),
        "oxy_time_left": rng.random_range(3000..6000),
        "temperature": rng.random_range(68.0..72.0),
    })
}

fn dcu_panel(rng: &mut impl Rng) -> Value {
    json!({
        "batt": true,
        "oxy": true,
        "comm": true,
        "fan": rng.random_range(0..2) == 1,
        "pump": false,
        "co2": false,
    })
}

fn imu_reading(rng: &mut impl Rng) -> Value {
    json!({
        "posx": rng.random_range(-5.0..5.0),
        "posy": rng.random_range(-5.0..5.0),
        "heading": rng.random_range(0.0..360.0),
    })
}
