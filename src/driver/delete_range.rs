// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use futures::future::join_all;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    driver::{list::ListReceiver, S3Driver},
    generation::TimestampedGeneration,
    prelude::*,
    types::{KeyRange, ListOptions, WriteOptions},
};

enum ListEvent {
    Delete(JoinHandle<KvResult<TimestampedGeneration>>),
    Done,
    Error(KvError),
}

/// Receiver that fans every listed key out to an unconditional delete. The
/// deletes are launched as keys stream in; list emission is not gated by
/// delete completion, so a large range can have many deletes in flight at
/// once (bounded only by the admission queue).
struct DeleteRangeReceiver {
    driver: S3Driver,
    events: mpsc::UnboundedSender<ListEvent>,
    cancel: Option<Box<dyn Fn() + Send + Sync>>,
}

impl ListReceiver for DeleteRangeReceiver {
    fn set_starting(&mut self, cancel: Box<dyn Fn() + Send + Sync>) {
        self.cancel = Some(cancel);
    }

    fn set_value(&mut self, key: String) {
        let driver = self.driver.clone();
        let handle =
            tokio::spawn(async move { driver.write(&key, None, WriteOptions::default()).await });
        if self.events.send(ListEvent::Delete(handle)).is_err() {
            // the caller abandoned the operation; stop the listing too
            if let Some(cancel) = &self.cancel {
                cancel();
            }
        }
    }

    fn set_done(&mut self) {
        let _ = self.events.send(ListEvent::Done);
    }

    fn set_error(&mut self, error: KvError) {
        let _ = self.events.send(ListEvent::Error(error));
    }

    fn set_stopping(&mut self) {
        self.cancel = None;
    }
}

pub(crate) async fn delete_range_impl(driver: &S3Driver, range: KeyRange) -> KvResult<()> {
    let (events, mut collected) = mpsc::unbounded_channel();
    let options = ListOptions {
        range,
        strip_prefix_length: 0,
        staleness_bound: None,
    };
    driver.list(
        options,
        DeleteRangeReceiver {
            driver: driver.clone(),
            events,
            cancel: None,
        },
    );

    let mut handles = Vec::new();
    let mut deferred: Option<KvError> = None;
    while let Some(event) = collected.recv().await {
        match event {
            ListEvent::Delete(handle) => handles.push(handle),
            ListEvent::Done => break,
            ListEvent::Error(error) => {
                deferred = Some(error);
                break;
            }
        }
    }

    // every launched delete completes before the operation resolves; the
    // first failure wins
    for joined in join_all(handles).await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_error) => {
                deferred
                    .get_or_insert_with(|| KvError::Internal(join_error.to_string().into()));
                continue;
            }
        };
        if let Err(error) = outcome {
            deferred.get_or_insert(error);
        }
    }

    match deferred {
        None => Ok(()),
        Some(error) => Err(error),
    }
}
