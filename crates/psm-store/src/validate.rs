//! Strict post-load invariant checks; any breach is fatal for the run
//! (`PsmError::InvalidStore`).

use psm_core::{Mode, PsmError, State, Store};

pub fn validate_store(store: &Store) -> Result<(), PsmError> {
    if store.meta.schema_version != psm_core::SCHEMA_VERSION {
        return Err(PsmError::InvalidStore(format!(
            "unexpected schema_version {:?}",
            store.meta.schema_version
        )));
    }

    for (key, position) in store.iter_positions() {
        match position.mode {
            Mode::Owned => {
                if !matches!(position.state, State::NormalRun | State::SpikeLock) {
                    return Err(PsmError::InvalidStore(format!(
                        "{key}: OWNED position in invalid state {:?}",
                        position.state
                    )));
                }
                if position.execution.entry_price.is_none() {
                    return Err(PsmError::InvalidStore(format!(
                        "{key}: OWNED position missing entry_price"
                    )));
                }
            }
            Mode::Watch => {
                if !matches!(position.state, State::ExitedCooldown | State::ReentryWindow) {
                    return Err(PsmError::InvalidStore(format!(
                        "{key}: WATCH position in invalid state {:?}",
                        position.state
                    )));
                }
            }
        }

        let bars = &position.buffers.ohlc;
        if bars.len() > store.global.bars_buffer_max {
            return Err(PsmError::InvalidStore(format!(
                "{key}: buffer length {} exceeds bars_buffer_max {}",
                bars.len(),
                store.global.bars_buffer_max
            )));
        }
        for window in bars.windows(2) {
            if window[0].date >= window[1].date {
                return Err(PsmError::InvalidStore(format!(
                    "{key}: buffer dates not strictly ascending at {}",
                    window[1].date
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use psm_core::{Bar, Position};

    #[test]
    fn rejects_owned_without_entry_price() {
        let mut store = Store::empty();
        let mut position = Position::new("ACME", "US");
        position.mode = Mode::Owned;
        position.state = State::NormalRun;
        store.positions.insert(position.key(), position);
        assert!(validate_store(&store).is_err());
    }

    #[test]
    fn rejects_unsorted_buffer() {
        let mut store = Store::empty();
        let mut position = Position::new("ACME", "US");
        position.buffers.ohlc = vec![
            Bar { date: "2024-01-02".into(), open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0 },
            Bar { date: "2024-01-01".into(), open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1.0 },
        ];
        store.positions.insert(position.key(), position);
        assert!(validate_store(&store).is_err());
    }

    #[test]
    fn accepts_freshly_created_position() {
        let mut store = Store::empty();
        let position = Position::new("ACME", "US");
        store.positions.insert(position.key(), position);
        assert!(validate_store(&store).is_ok());
    }
}
