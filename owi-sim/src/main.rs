use clap::Parser;
use fixed::types::I12F4;
use nanodeploy_owi::{
    DEV_LOAD_CFG_CMD, DEV_LOAD_DATA_CMD, DEV_MEASURE_CMD, DEV_READ_DATA_CMD, DEV_WRITE_DATA_CMD,
    MEAS_ALTITUDE_OFFSET, MEAS_PRESSURE_OFFSET, MEAS_TEMPERATURE_OFFSET, Parameters,
};
use owi_slave::{OWI_READ_ID_CMD, OWI_SEARCH_CMD, OWI_SKIP_CMD, OwiCrc};
use owi_sim::{Harness, Mode, SimBoard};

/// Run a scripted host session against the simulated nanodeploy device
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Ambient pressure reported by the simulated barometer, in pascals
    #[arg(short, long, default_value_t = 95_000)]
    pressure: u32,

    /// Raw temperature reading, in sixteenths of a degree C
    #[arg(short, long, default_value_t = 0x0150)]
    temperature: u16,

    /// Log-storage address to stream back
    #[arg(short, long, default_value_t = 0x0012)]
    log_addr: u16,
}

fn main() {
    // Initialize the logger
    env_logger::init();
    // Parse command line arguments
    let args = Args::parse();

    // Build the simulated board and preload a recognizable log pattern
    let mut board = SimBoard::new()
        .with_pressure(args.pressure)
        .with_raw_temperature(args.temperature);
    let pattern: Vec<u8> = (0u16..64).map(|i| (i as u8).wrapping_mul(3)).collect();
    board.load_log(args.log_addr, &pattern);
    let mut bus = Harness::new(board);

    // Reset the bus and check for a presence pulse
    assert!(bus.reset(), "no presence pulse after reset");
    assert_eq!(bus.mode, Mode::Maintenance);
    log::info!("device present, flight logic suspended");

    // Discover the device identity
    bus.command(OWI_SEARCH_CMD).expect("search dispatch failed");
    let rom = bus.search_round().expect("device dropped out of search");
    assert!(OwiCrc::validate(&rom), "identity CRC invalid");
    log::info!("found identity {rom:02x?}");

    // Read the identity back directly
    bus.reset();
    bus.command(OWI_READ_ID_CMD).expect("read-id failed");
    let mut id = [0u8; 8];
    bus.read_block(&mut id).expect("identity read failed");
    assert_eq!(id, rom);

    // Take a measurement and stream the record back
    bus.reset();
    bus.command(OWI_SKIP_CMD).expect("skip failed");
    bus.command(DEV_MEASURE_CMD).expect("measure failed");
    bus.command(DEV_READ_DATA_CMD).expect("read-data failed");
    let mut record = [0u8; 64];
    bus.read_block(&mut record).expect("record read failed");
    let pressure = u32::from_le_bytes(
        record[MEAS_PRESSURE_OFFSET..MEAS_PRESSURE_OFFSET + 4]
            .try_into()
            .unwrap(),
    );
    let altitude = u16::from_le_bytes(
        record[MEAS_ALTITUDE_OFFSET..MEAS_ALTITUDE_OFFSET + 2]
            .try_into()
            .unwrap(),
    );
    let raw_temp = u16::from_le_bytes(
        record[MEAS_TEMPERATURE_OFFSET..MEAS_TEMPERATURE_OFFSET + 2]
            .try_into()
            .unwrap(),
    );
    let temperature = I12F4::from_bits(raw_temp as i16);
    log::info!("measured {pressure} Pa, altitude {altitude} m, temperature {temperature} C");

    // Inspect the stored configuration
    bus.reset();
    bus.command(OWI_SKIP_CMD).expect("skip failed");
    bus.command(DEV_LOAD_CFG_CMD).expect("load-cfg failed");
    bus.command(DEV_READ_DATA_CMD).expect("read-data failed");
    let mut cfg = [0u8; 64];
    bus.read_block(&mut cfg).expect("config read failed");
    let params = Parameters::new(&cfg);
    assert!(params.valid(), "configuration CRC invalid");
    log::info!(
        "configuration '{}', base pressure {} Pa",
        params.name(),
        params.base_pressure()
    );

    // Round-trip the scratch buffer
    bus.reset();
    bus.command(OWI_SKIP_CMD).expect("skip failed");
    bus.command(DEV_WRITE_DATA_CMD).expect("write-data failed");
    let payload: Vec<u8> = (0u8..64).collect();
    bus.write_block(&payload).expect("payload write failed");
    bus.command(DEV_READ_DATA_CMD).expect("read-data failed");
    let mut echo = [0u8; 64];
    bus.read_block(&mut echo).expect("payload read failed");
    assert_eq!(echo.as_slice(), payload.as_slice());

    // Stream the preloaded log segment
    bus.command(DEV_LOAD_DATA_CMD).expect("load-data failed");
    bus.write_block(&args.log_addr.to_le_bytes())
        .expect("address write failed");
    bus.command(DEV_READ_DATA_CMD).expect("read-data failed");
    let mut log_block = [0u8; 64];
    bus.read_block(&mut log_block).expect("log read failed");
    assert_eq!(log_block.as_slice(), pattern.as_slice());
    log::info!(
        "streamed 64 bytes of log storage from {:#06x} in {} us of bus time",
        args.log_addr,
        bus.elapsed_us()
    );
}
