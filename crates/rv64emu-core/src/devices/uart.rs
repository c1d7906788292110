//! 16550-subset console UART with a background stdin producer thread.
//!
//! The hart thread and the producer thread share `Inner` through a `Mutex`;
//! the `Condvar` gives the producer back-pressure so it blocks once the
//! receive buffer is full instead of busy-waiting or dropping input.
use std::io::Read;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::exception::Exception;
use crate::primitives::constants::UART_BASE;

/// IRQ line the UART raises through the PLIC.
pub const UART_IRQ: u64 = 10;

const RHR: u64 = 0; // receive holding register (read)
const THR: u64 = 0; // transmit holding register (write)
const LCR: u64 = 3; // line control register
const LSR: u64 = 5; // line status register
const LSR_RX: u8 = 1; // data ready in RHR
const LSR_TX: u8 = 1 << 5; // THR empty / ready to transmit

struct Inner {
    rhr: u8,
    lsr: u8,
    lcr: u8,
    interrupting: bool,
}

/// Console UART. Cloning the internal `Arc` is how the producer thread
/// observes the same registers the hart reads and writes.
pub struct Uart {
    inner: Arc<(Mutex<Inner>, Condvar)>,
}

impl Uart {
    /// Construct the UART and spawn its stdin-reading producer thread.
    pub fn new() -> Self {
        let inner = Arc::new((
            Mutex::new(Inner {
                rhr: 0,
                lsr: LSR_TX,
                lcr: 0,
                interrupting: false,
            }),
            Condvar::new(),
        ));

        let producer = Arc::clone(&inner);
        thread::spawn(move || {
            let (lock, cvar) = &*producer;
            let mut byte = [0u8; 1];
            loop {
                if std::io::stdin().read_exact(&mut byte).is_err() {
                    return;
                }
                let mut state = lock.lock().unwrap();
                while state.lsr & LSR_RX != 0 {
                    state = cvar.wait(state).unwrap();
                }
                state.rhr = byte[0];
                state.lsr |= LSR_RX;
                state.interrupting = true;
                drop(state);
                cvar.notify_all();
            }
        });

        Self { inner }
    }

    /// `true` once since the last disk/uart interrupt check if new input has
    /// arrived.
    pub fn is_interrupting(&self) -> bool {
        let (lock, _) = &*self.inner;
        let mut state = lock.lock().unwrap();
        let was = state.interrupting;
        state.interrupting = false;
        was
    }

    pub fn load(&mut self, addr: u64, size: u8) -> Result<u64, Exception> {
        if size != 8 {
            return Err(Exception::LoadAccessFault);
        }
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        let value = match addr - UART_BASE {
            RHR => {
                let value = state.rhr as u64;
                state.lsr &= !LSR_RX;
                cvar.notify_all();
                value
            }
            LCR => state.lcr as u64,
            LSR => state.lsr as u64,
            _ => 0,
        };
        Ok(value)
    }

    /// Deliver a byte as if the producer thread had read it from stdin.
    /// Used by tests that need a deterministic substitute for a live
    /// keypress on stdin.
    #[cfg(test)]
    fn inject_byte(&self, byte: u8) {
        let (lock, cvar) = &*self.inner;
        let mut state = lock.lock().unwrap();
        state.rhr = byte;
        state.lsr |= LSR_RX;
        state.interrupting = true;
        drop(state);
        cvar.notify_all();
    }

    pub fn store(&mut self, addr: u64, size: u8, value: u64) -> Result<(), Exception> {
        if size != 8 {
            return Err(Exception::StoreAMOAccessFault);
        }
        let (lock, _) = &*self.inner;
        let mut state = lock.lock().unwrap();
        match addr - UART_BASE {
            THR => {
                print!("{}", value as u8 as char);
                use std::io::Write;
                let _ = std::io::stdout().flush();
            }
            LCR => state.lcr = value as u8,
            _ => {}
        }
        Ok(())
    }
}

impl Default for Uart {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Uart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uart").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lcr_roundtrips() {
        let mut uart = Uart::new();
        uart.store(UART_BASE + LCR, 8, 0x03).unwrap();
        assert_eq!(uart.load(UART_BASE + LCR, 8).unwrap(), 0x03);
    }

    #[test]
    fn tx_ready_bit_always_set() {
        let mut uart = Uart::new();
        let lsr = uart.load(UART_BASE + LSR, 8).unwrap();
        assert_eq!(lsr as u8 & LSR_TX, LSR_TX);
    }

    #[test]
    fn enter_keypress_sets_rhr_and_lsr_rx_then_clears_on_read() {
        let mut uart = Uart::new();
        uart.inject_byte(0x0A);
        assert!(uart.is_interrupting());

        let lsr = uart.load(UART_BASE + LSR, 8).unwrap() as u8;
        assert_eq!(lsr & LSR_RX, LSR_RX);

        let rhr = uart.load(UART_BASE + RHR, 8).unwrap();
        assert_eq!(rhr, 0x0A);

        let lsr_after = uart.load(UART_BASE + LSR, 8).unwrap() as u8;
        assert_eq!(lsr_after & LSR_RX, 0);
    }
}
