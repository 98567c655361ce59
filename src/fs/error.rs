// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("open: not exist")]
    OpenNotExist,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
