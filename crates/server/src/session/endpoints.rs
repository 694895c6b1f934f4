//! Per-session endpoint table

use common::{ControlPipe, EndpointPipe, MAX_ENDPOINTS};
use tracing::{debug, warn};

/// Open pipes of one imported device
///
/// Slot 0 is the control pipe, opened at import and kept for the whole
/// session. Slots 1..=15 hold data endpoints and may be empty at any time.
pub struct EndpointTable<C: ControlPipe> {
    control: C,
    data: [Option<C::Endpoint>; MAX_ENDPOINTS - 1],
}

impl<C: ControlPipe> EndpointTable<C> {
    /// Table with only the control pipe
    pub fn new(control: C) -> Self {
        Self {
            control,
            data: std::array::from_fn(|_| None),
        }
    }

    pub fn control(&mut self) -> &mut C {
        &mut self.control
    }

    /// Data endpoint `number`, if that slot is open
    pub fn endpoint(&mut self, number: u32) -> Option<&mut C::Endpoint> {
        let slot = Self::slot(number)?;
        self.data[slot].as_mut()
    }

    pub fn is_open(&self, number: u32) -> bool {
        Self::slot(number).is_some_and(|slot| self.data[slot].is_some())
    }

    pub fn open_count(&self) -> usize {
        self.data.iter().filter(|slot| slot.is_some()).count()
    }

    /// Try to open every data endpoint; failures leave the slot empty
    ///
    /// With `short_transfer` each opened endpoint is switched to accept
    /// short reads. Returns the number of open slots.
    pub fn open_all(&mut self, short_transfer: bool) -> usize {
        for number in 1..MAX_ENDPOINTS as u8 {
            let slot = usize::from(number) - 1;
            if self.data[slot].is_some() {
                continue;
            }
            match self.control.open_endpoint(number) {
                Ok(mut endpoint) => {
                    if short_transfer && let Err(e) = endpoint.set_short_transfer(true) {
                        warn!("Cannot set short transfer on endpoint {}: {}", number, e);
                    }
                    self.data[slot] = Some(endpoint);
                }
                Err(e) => debug!("Endpoint {} not opened: {}", number, e),
            }
        }
        self.open_count()
    }

    /// Close every data endpoint; the control pipe stays open
    pub fn close_all(&mut self) {
        for slot in self.data.iter_mut() {
            slot.take();
        }
    }

    fn slot(number: u32) -> Option<usize> {
        let number = usize::try_from(number).ok()?;
        (1..MAX_ENDPOINTS).contains(&number).then(|| number - 1)
    }
}
