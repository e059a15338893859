pub mod bacnet;
pub mod modbus;
