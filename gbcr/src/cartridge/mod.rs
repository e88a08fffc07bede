//! Cartridge model: bus addressing, header layout and bank controllers.

pub mod address;
pub mod header;
pub mod mapper;

pub use address::{
    HEADER_ADDRESS, HEADER_LENGTH, RAM_WINDOW_ADDRESS, RamAddressing, RomLocation, block_address,
    encode_address, rom_location,
};
pub use header::CartridgeHeader;
pub use mapper::{BankWrite, Mapper};
