//! A TCP server speaking the hub's packet protocol
//!
//! Serves one client at a time and simulates an LCD 20x4 and a
//! voltage/current sensor. Dropping the client makes the transport reconnect
//! and the listener accepts the new connection.

use powerstation_rs::backend::packet::{
    encode_enumerate_payload, read_fixed_str, Packet, PacketHeader, BROADCAST_UID,
    CALLBACK_ENUMERATE, FUNCTION_ENUMERATE, HEADER_LEN,
};
use powerstation_rs::backend::{Lcd20x4, Uid, VoltageCurrent};
use powerstation_rs::types::{DeviceAnnouncement, EnumerationType};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

/// What the fake devices look like right now
#[derive(Debug, Clone, Default)]
pub struct FakeHubState {
    pub lines: [String; 4],
    pub backlight: bool,
    pub clears: u32,
    pub enumerates: u32,
    pub connections: u32,
    pub current: i32,
    pub voltage: i32,
    pub power: i32,
}

pub struct FakeHub {
    port: u16,
    lcd: Uid,
    state: Arc<Mutex<FakeHubState>>,
    client: Arc<Mutex<Option<TcpStream>>>,
}

impl FakeHub {
    /// Listen on an ephemeral localhost port
    pub fn start(lcd: Uid, sensor: Uid, current: i32, voltage: i32, power: i32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(FakeHubState {
            current,
            voltage,
            power,
            ..Default::default()
        }));
        let client: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));

        let server_state = state.clone();
        let server_client = client.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let Ok(reader) = stream.try_clone() else { continue };
                *server_client.lock().unwrap() = Some(stream);
                server_state.lock().unwrap().connections += 1;
                let _ = serve(reader, &server_client, &server_state, lcd, sensor);
            }
        });

        Self {
            port,
            lcd,
            state,
            client,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> FakeHubState {
        self.state.lock().unwrap().clone()
    }

    /// Push a button-released callback from the LCD
    pub fn release_button(&self, button: u8) {
        let packet = Packet::request(
            self.lcd.raw(),
            Lcd20x4::CALLBACK_BUTTON_RELEASED,
            0,
            false,
            vec![button],
        )
        .unwrap();
        send(&self.client, &packet).unwrap();
    }

    /// Close the current client connection
    pub fn drop_client(&self) {
        if let Some(stream) = self.client.lock().unwrap().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn send(client: &Mutex<Option<TcpStream>>, packet: &Packet) -> io::Result<()> {
    match client.lock().unwrap().as_mut() {
        Some(stream) => stream.write_all(&packet.encode()),
        None => Err(io::Error::new(io::ErrorKind::NotConnected, "no client")),
    }
}

fn serve(
    mut reader: TcpStream,
    client: &Mutex<Option<TcpStream>>,
    state: &Mutex<FakeHubState>,
    lcd: Uid,
    sensor: Uid,
) -> io::Result<()> {
    loop {
        let mut header_bytes = [0u8; HEADER_LEN];
        reader.read_exact(&mut header_bytes)?;
        let header = PacketHeader::decode(&header_bytes);
        let mut payload = vec![0u8; header.payload_len()];
        reader.read_exact(&mut payload)?;

        if header.uid == BROADCAST_UID && header.function_id == FUNCTION_ENUMERATE {
            state.lock().unwrap().enumerates += 1;
            for (uid, kind) in [
                (lcd, Lcd20x4::DEVICE_IDENTIFIER),
                (sensor, VoltageCurrent::DEVICE_IDENTIFIER),
            ] {
                let announcement = DeviceAnnouncement::new(uid, kind, EnumerationType::Available);
                let packet = Packet::request(
                    uid.raw(),
                    CALLBACK_ENUMERATE,
                    0,
                    false,
                    encode_enumerate_payload(&announcement),
                )
                .unwrap();
                send(client, &packet)?;
            }
            continue;
        }

        let response = {
            let mut state = state.lock().unwrap();
            if header.uid == lcd.raw() {
                handle_lcd(&mut state, header.function_id, &payload)
            } else if header.uid == sensor.raw() {
                handle_sensor(&state, header.function_id)
            } else {
                // Unknown devices never answer
                continue;
            }
        };

        if header.response_expected {
            let packet = Packet::request(
                header.uid,
                header.function_id,
                header.sequence,
                true,
                response,
            )
            .unwrap();
            send(client, &packet)?;
        }
    }
}

fn handle_lcd(state: &mut FakeHubState, function_id: u8, payload: &[u8]) -> Vec<u8> {
    match function_id {
        Lcd20x4::FUNCTION_WRITE_LINE => {
            if let Some(line) = state.lines.get_mut(usize::from(payload[0])) {
                *line = read_fixed_str(&payload[2..]);
            }
            Vec::new()
        }
        Lcd20x4::FUNCTION_CLEAR_DISPLAY => {
            state.lines = Default::default();
            state.clears += 1;
            Vec::new()
        }
        Lcd20x4::FUNCTION_BACKLIGHT_ON => {
            state.backlight = true;
            Vec::new()
        }
        Lcd20x4::FUNCTION_BACKLIGHT_OFF => {
            state.backlight = false;
            Vec::new()
        }
        Lcd20x4::FUNCTION_IS_BACKLIGHT_ON => vec![u8::from(state.backlight)],
        _ => Vec::new(),
    }
}

fn handle_sensor(state: &FakeHubState, function_id: u8) -> Vec<u8> {
    match function_id {
        VoltageCurrent::FUNCTION_GET_CURRENT => state.current.to_le_bytes().to_vec(),
        VoltageCurrent::FUNCTION_GET_VOLTAGE => state.voltage.to_le_bytes().to_vec(),
        VoltageCurrent::FUNCTION_GET_POWER => state.power.to_le_bytes().to_vec(),
        _ => Vec::new(),
    }
}
