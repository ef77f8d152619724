/// Example demonstrating SMP pairing between two devices over a loopback link
use bluesmp::smp::*;
use bluesmp::{Address, HciError, L2capError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Queues PDUs for the other side instead of handing them to a controller
#[derive(Default)]
struct Loopback {
    outbox: VecDeque<(u16, Vec<u8>)>,
    encryption: Option<([u8; 16], u16, [u8; 8])>,
}

impl SmpTransport for Loopback {
    fn send_fixed(&mut self, _peer: &Address, cid: u16, pdu: &[u8]) -> Result<(), L2capError> {
        self.outbox.push_back((cid, pdu.to_vec()));
        Ok(())
    }

    fn release_fixed(&mut self, _peer: &Address, _cid: u16) {}

    fn start_encryption(
        &mut self,
        _peer: &Address,
        ltk: &[u8; 16],
        ediv: u16,
        rand: &[u8; 8],
    ) -> Result<(), HciError> {
        self.encryption = Some((*ltk, ediv, *rand));
        Ok(())
    }

    fn br_link_key(&self, _peer: &Address) -> Option<[u8; 16]> {
        None
    }
}

type Events = Arc<Mutex<Vec<SmpEvent>>>;

fn device(addr: Address, name: &'static str) -> Result<(SmpManager<Loopback>, Events), SmpError> {
    let config = SmpConfig::new(addr)
        .with_io_capability(IoCapability::DisplayYesNo)
        .with_auth_req(AuthReq::BONDING | AuthReq::MITM | AuthReq::SC);
    let mut smp = SmpManager::new(config, Loopback::default(), Box::new(MemoryKeyStore::new()))?;

    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    smp.register_callback(move |event| {
        match &event {
            SmpEvent::NumericComparison { peer, value } => {
                println!("[{}] confirm {:06} with {}", name, value, peer)
            }
            SmpEvent::PairingComplete {
                reason, sec_level, ..
            } => println!("[{}] pairing complete: {} ({:?})", name, reason, sec_level),
            other => println!("[{}] {:?}", name, other),
        }
        sink.lock()
            .map_err(|_| SmpError::InvalidState)?
            .push(event);
        Ok(())
    });
    Ok((smp, events))
}

/// Move PDUs and encryption requests across until both sides go quiet.
fn pump(
    central: &mut SmpManager<Loopback>,
    central_addr: Address,
    peripheral: &mut SmpManager<Loopback>,
    peripheral_addr: Address,
) -> Result<(), SmpError> {
    loop {
        let mut progressed = false;
        while let Some((_, pdu)) = central.transport_mut().outbox.pop_front() {
            peripheral.handle_smp_packet(central_addr, &pdu)?;
            progressed = true;
        }
        while let Some((_, pdu)) = peripheral.transport_mut().outbox.pop_front() {
            central.handle_smp_packet(peripheral_addr, &pdu)?;
            progressed = true;
        }
        if let Some((ltk, ediv, rand)) = central.transport_mut().encryption.take() {
            let ok = peripheral.encryption_key_request(central_addr, ediv, rand) == Some(ltk);
            peripheral.on_encryption_changed(central_addr, ok);
            central.on_encryption_changed(peripheral_addr, ok);
            progressed = true;
        }
        if !progressed {
            return Ok(());
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("SMP Pairing Example");
    println!("-----------------");

    let central_addr = Address::public([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
    let peripheral_addr = Address::random([0x11, 0x22, 0x33, 0x44, 0x55, 0xc6]);
    let (mut central, _) = device(central_addr, "central")?;
    let (mut peripheral, _) = device(peripheral_addr, "peripheral")?;

    central.pair(peripheral_addr)?;
    pump(&mut central, central_addr, &mut peripheral, peripheral_addr)?;
    println!("Association model: {:?}", central.association_model());

    // Both users confirm the number on screen
    central.numeric_comparison_reply(peripheral_addr, true)?;
    peripheral.numeric_comparison_reply(central_addr, true)?;
    pump(&mut central, central_addr, &mut peripheral, peripheral_addr)?;

    for addr in central.key_store().get_paired_devices()? {
        println!("Central bonded with {}", addr);
    }
    Ok(())
}
