//! Identifiers of the built-in service classes and the packets the engine
//! itself interprets.  They must agree with `catalogue/services.json`.

// ── Service classes ───────────────────────────────────────────

pub const SRV_CONTROL: u32 = 0x0000_0000;
pub const SRV_SENSOR: u32 = 0x1e31_6da1;
pub const SRV_BUTTON: u32 = 0x1473_a263;
pub const SRV_PRESSURE_BUTTON: u32 = 0x2817_40c3;
pub const SRV_BUTTON_GESTURE: u32 = 0x1ab7_b0b0;
pub const SRV_TEMPERATURE: u32 = 0x1421_bac7;
pub const SRV_BOOTLOADER: u32 = 0x1ffa_9948;

// ── Control service ───────────────────────────────────────────

pub const CONTROL_CMD_RESET: u16 = 0x81;
pub const CONTROL_CMD_IDENTIFY: u16 = 0x82;
/// Instance name; answered on any service index, not just control.
pub const REG_INSTANCE_NAME: u16 = 0x109;
pub const CONTROL_REG_FIRMWARE_IDENTIFIER: u16 = 0x181;
pub const CONTROL_REG_FIRMWARE_VERSION: u16 = 0x185;
pub const CONTROL_REG_UPTIME: u16 = 0x186;

// ── Button ────────────────────────────────────────────────────

pub const BUTTON_REG_PRESSURE: u16 = 0x101;
pub const BUTTON_EV_DOWN: u8 = 0x01;
pub const BUTTON_EV_UP: u8 = 0x02;
pub const BUTTON_EV_HOLD: u8 = 0x81;

// ── Button gesture ────────────────────────────────────────────

pub const GESTURE_REG_CLICK_TIMEOUT: u16 = 0x80;
pub const GESTURE_REG_MULTI_CLICK_TIMEOUT: u16 = 0x81;
pub const GESTURE_EV_CLICK: u8 = 1;
pub const GESTURE_EV_DOUBLE_CLICK: u8 = 2;
pub const GESTURE_EV_MULTI_CLICK: u8 = 3;
pub const GESTURE_EV_CLICK_HOLD: u8 = 4;
pub const GESTURE_EV_MULTI_CLICK_HOLD: u8 = 5;
pub const GESTURE_EV_HOLD_RELEASE: u8 = 6;

// ── Bootloader ────────────────────────────────────────────────

pub const BOOTLOADER_REG_PAGE_SIZE: u16 = 0x180;
pub const BOOTLOADER_CMD_PAGE_DATA: u16 = 0x80;
pub const BOOTLOADER_CMD_SET_SESSION: u16 = 0x81;
pub const BOOTLOADER_CMD_FINALIZE: u16 = 0x82;

/// Status codes carried in bootloader reports.
pub const BOOTLOADER_STATUS_OK: u32 = 0;
pub const BOOTLOADER_STATUS_BAD_SESSION: u32 = 1;
pub const BOOTLOADER_STATUS_NON_SEQUENTIAL: u32 = 2;
pub const BOOTLOADER_STATUS_OVERFLOW: u32 = 3;
pub const BOOTLOADER_STATUS_INCOMPLETE: u32 = 4;
pub const BOOTLOADER_STATUS_VERIFY_FAILED: u32 = 5;
