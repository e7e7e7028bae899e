//! WS2812 status strip over RMT.

use anyhow::Result;
use esp_idf_hal::gpio::Gpio48;
use esp_idf_hal::rmt::CHANNEL0;
use smart_leds::{SmartLedsWrite, RGB8};
use ws2812_esp32_rmt_driver::Ws2812Esp32Rmt;

use station_core::{Rgb, StatusLed};

/// Element count of the strip; every status write drives all of them.
const NUM_LEDS: usize = 5;

pub struct StatusStrip {
    strip: Ws2812Esp32Rmt<'static>,
}

impl StatusStrip {
    pub fn new(channel: CHANNEL0, pin: Gpio48) -> Result<Self> {
        let strip = Ws2812Esp32Rmt::new(channel, pin)?;
        let mut this = Self { strip };
        this.push(RGB8::new(0, 0, 0));
        Ok(this)
    }

    fn push(&mut self, pixel: RGB8) {
        // A failed refresh is a cosmetic glitch, not an error worth
        // propagating into the state machines.
        if let Err(e) = self.strip.write([pixel; NUM_LEDS].into_iter()) {
            log::warn!("LED strip write failed: {:?}", e);
        }
    }
}

impl StatusLed for StatusStrip {
    fn set_all(&mut self, color: Rgb) {
        self.push(RGB8::new(color.r, color.g, color.b));
    }

    fn clear(&mut self) {
        self.push(RGB8::new(0, 0, 0));
    }
}
