//! Register-level tests of the SX127x driver against mocked SPI and chip-select lines.

use chirp::radio::RadioLink;
use chirp_sx127x::Sx127x;
use embedded_hal_mock::pin::{Mock as PinMock, State as PinState, Transaction as PinTransaction};
use embedded_hal_mock::spi::{Mock as SpiMock, Transaction as SpiTransaction};

/// Every register access frames one SPI operation with a chip-select toggle.
fn cs_toggles(ops: usize) -> Vec<PinTransaction> {
    (0..ops)
        .flat_map(|_| {
            [
                PinTransaction::set(PinState::Low),
                PinTransaction::set(PinState::High),
            ]
        })
        .collect()
}

#[test]
fn init_configures_sleep_pa_and_dio() {
    let spi = SpiMock::new(&[
        SpiTransaction::write(vec![0x81, 0x80]), // OpMode: sleep + LoRa
        SpiTransaction::write(vec![0x89, 0xFF]), // PaConfig: full power
        SpiTransaction::write(vec![0xC0, 0x00]), // DioMapping1
    ]);
    let cs = PinMock::new(&cs_toggles(3));

    let mut radio = Sx127x::new(spi, cs);
    radio.init().unwrap();

    let (mut spi, mut cs) = radio.free();
    spi.done();
    cs.done();
}

#[test]
fn poll_with_no_rx_flags_reads_nothing() {
    let spi = SpiMock::new(&[SpiTransaction::transfer(vec![0x12, 0x00], vec![0x12, 0x00])]);
    let cs = PinMock::new(&cs_toggles(1));

    let mut radio = Sx127x::new(spi, cs);
    let mut buf = [0; 32];
    assert_eq!(radio.poll_rx(&mut buf).unwrap(), 0);

    let (mut spi, mut cs) = radio.free();
    spi.done();
    cs.done();
}

#[test]
fn send_bursts_fifo_and_waits_for_tx_done() {
    let spi = SpiMock::new(&[
        SpiTransaction::write(vec![0x81, 0x81]), // standby
        SpiTransaction::write(vec![0x8D, 0x80]), // FIFO pointer to tx half
        SpiTransaction::write(vec![0x80, 0xAB]),
        SpiTransaction::write(vec![0x80, 0xCD]),
        SpiTransaction::write(vec![0xA2, 0x02]), // payload length
        SpiTransaction::write(vec![0x81, 0x83]), // tx mode
        SpiTransaction::transfer(vec![0x12, 0x00], vec![0x12, 0x08]), // TX_DONE
        SpiTransaction::write(vec![0x92, 0x08]), // clear TX_DONE
        SpiTransaction::write(vec![0x81, 0x80]), // back to rx: sleep
        SpiTransaction::write(vec![0x8D, 0x00]),
        SpiTransaction::write(vec![0x81, 0x85]), // rx continuous
    ]);
    let cs = PinMock::new(&cs_toggles(11));

    let mut radio = Sx127x::new(spi, cs);
    radio.send(&[0xAB, 0xCD]).unwrap();

    let (mut spi, mut cs) = radio.free();
    spi.done();
    cs.done();
}

#[test]
fn poll_folds_unread_messages_into_one_run() {
    // The write pointer sits at 0x02 while our last read ended at 0x00: the 2 reported bytes
    // of the newest message plus the 2 unread ones before it come back as a single run.
    let spi = SpiMock::new(&[
        SpiTransaction::transfer(vec![0x12, 0x00], vec![0x12, 0x50]), // RX_DONE | VALID_HEADER
        SpiTransaction::transfer(vec![0x13, 0x00], vec![0x13, 0x02]), // plausible length
        SpiTransaction::write(vec![0x92, 0xFF]),                      // clear flags
        SpiTransaction::transfer(vec![0x13, 0x00], vec![0x13, 0x02]), // reported length
        SpiTransaction::transfer(vec![0x10, 0x00], vec![0x10, 0x02]), // current write pointer
        SpiTransaction::transfer(vec![0x0F, 0x00], vec![0x0F, 0x00]), // FIFO base
        SpiTransaction::write(vec![0x8D, 0x00]),                      // seek to run start
        SpiTransaction::transfer(vec![0x00, 0x00], vec![0x00, 0x11]),
        SpiTransaction::transfer(vec![0x00, 0x00], vec![0x00, 0x22]),
        SpiTransaction::transfer(vec![0x00, 0x00], vec![0x00, 0x33]),
        SpiTransaction::transfer(vec![0x00, 0x00], vec![0x00, 0x44]),
    ]);
    let cs = PinMock::new(&cs_toggles(11));

    let mut radio = Sx127x::new(spi, cs);
    let mut buf = [0; 32];
    assert_eq!(radio.poll_rx(&mut buf).unwrap(), 4);
    assert_eq!(&buf[..4], &[0x11, 0x22, 0x33, 0x44]);

    let (mut spi, mut cs) = radio.free();
    spi.done();
    cs.done();
}

#[test]
fn oversized_message_is_discarded_as_noise() {
    let spi = SpiMock::new(&[
        SpiTransaction::transfer(vec![0x12, 0x00], vec![0x12, 0x50]),
        SpiTransaction::transfer(vec![0x13, 0x00], vec![0x13, 0x40]), // 64 bytes: not a frame
        SpiTransaction::write(vec![0x92, 0xFF]),
    ]);
    let cs = PinMock::new(&cs_toggles(3));

    let mut radio = Sx127x::new(spi, cs);
    let mut buf = [0; 32];
    assert_eq!(radio.poll_rx(&mut buf).unwrap(), 0);

    let (mut spi, mut cs) = radio.free();
    spi.done();
    cs.done();
}
