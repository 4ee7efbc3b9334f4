//! Minesweeper board used by the minefield session server.
//!
//! Mines are laid out lazily on the first reveal so the opening tap is always
//! safe. The layout is driven by a seed chosen at construction, which also
//! feeds the board fingerprint used as the session key.

mod board;
mod solver;
mod stats;

pub use board::{check_params, Board, BoardError, BoardState, Cell, Coord};
pub use stats::Statistics;
