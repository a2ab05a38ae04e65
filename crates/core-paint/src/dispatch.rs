//! Queue pair and consumer-side batch coalescing.
//!
//! Draw-dabs messages are common and arrive in bunches, so the paint
//! thread coalesces contiguous runs of them into one history call instead
//! of paying the full apply pipeline per message. The batch is bounded two
//! ways: message count (`MAX_MULTIDAB_MESSAGES`) and estimated covered
//! area (`MAX_MULTIDAB_AREA`), and batching is only attempted when the
//! first message leaves comfortable headroom
//! (`MAX_MULTIDAB_AREA_THRESHOLD`).
//!
//! Semaphore accounting: the producer posted one permit per queued entry.
//! `shift_dispatch` runs right after a `wait` consumed the permit of the
//! first entry; every additional entry it shifts takes that entry's permit
//! with `wait_n`, which cannot block because the posts preceded the
//! entries' presence in the queue.

use crate::preview::PreviewSwap;
use crate::sync::Semaphore;
use core_message::{CommandBody, Message, SharedMessage};
use std::collections::VecDeque;

/// Largest number of messages handed to history in one batch.
pub const MAX_MULTIDAB_MESSAGES: usize = 1024;

/// Largest estimated area, in square pixels, a batch may cover.
pub const MAX_MULTIDAB_AREA: i32 = 256 * 256 * 16;

/// If the first message alone estimates past this, batching is not even
/// attempted: the next message would likely push past the cap anyway.
pub const MAX_MULTIDAB_AREA_THRESHOLD: i32 = MAX_MULTIDAB_AREA / 2;

/// Initial capacity of either queue.
pub(crate) const INITIAL_QUEUE_CAPACITY: usize = 64;

/// One slot in the local or remote queue.
#[derive(Debug)]
pub(crate) enum QueueEntry {
    /// A protocol message (command or internal).
    Canvas(SharedMessage),
    /// Engine-local preview install/clear, routed through the queue so
    /// preview swaps serialise with the strokes around them.
    PreviewInstall(PreviewSwap),
}

#[derive(Debug)]
pub(crate) struct Queues {
    pub local: VecDeque<QueueEntry>,
    pub remote: VecDeque<QueueEntry>,
}

impl Queues {
    pub fn new() -> Self {
        Self {
            local: VecDeque::with_capacity(INITIAL_QUEUE_CAPACITY),
            remote: VecDeque::with_capacity(INITIAL_QUEUE_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.local.len() + self.remote.len()
    }
}

/// What the paint thread should do with what it shifted.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Preview(PreviewSwap),
    Single(SharedMessage),
    Batch(Vec<SharedMessage>),
}

/// Accumulate the estimated dab area of `msg` onto `area`, stopping early
/// once the running total passes `MAX_MULTIDAB_AREA`. Non-dab messages
/// report `MAX_MULTIDAB_AREA + 1` so they never batch.
pub fn message_dabs_area(msg: &Message, area: i32) -> i32 {
    let Some(command) = msg.as_command() else {
        return MAX_MULTIDAB_AREA + 1;
    };
    match command {
        CommandBody::DrawDabsClassic(d) => {
            accumulate_area(area, d.dabs.iter().map(|dab| dab.diameter()))
        }
        CommandBody::DrawDabsPixel(d) | CommandBody::DrawDabsPixelSquare(d) => {
            accumulate_area(area, d.dabs.iter().map(|dab| dab.diameter()))
        }
        CommandBody::DrawDabsMyPaint(d) => {
            accumulate_area(area, d.dabs.iter().map(|dab| dab.diameter()))
        }
        _ => MAX_MULTIDAB_AREA + 1,
    }
}

fn accumulate_area(mut area: i32, diameters: impl Iterator<Item = i32>) -> i32 {
    for diameter in diameters {
        if area >= MAX_MULTIDAB_AREA {
            break;
        }
        area += (diameter * diameter).max(1);
    }
    area
}

/// Shift the next unit of work. Local queue first: our own strokes stay
/// responsive no matter how busy the session is. Returns the dispatch and
/// whether it came from the local queue. Caller must hold the queue mutex
/// and have consumed one semaphore permit.
pub(crate) fn shift_dispatch(queues: &mut Queues, sem: &Semaphore) -> Option<(bool, Dispatch)> {
    let (local, entry) = match queues.local.pop_front() {
        Some(entry) => (true, entry),
        None => (false, queues.remote.pop_front()?),
    };
    let first = match entry {
        QueueEntry::PreviewInstall(swap) => return Some((local, Dispatch::Preview(swap))),
        QueueEntry::Canvas(msg) => msg,
    };

    let area = message_dabs_area(&first, 0);
    if area > MAX_MULTIDAB_AREA_THRESHOLD {
        return Some((local, Dispatch::Single(first)));
    }

    let queue = if local { &mut queues.local } else { &mut queues.remote };
    let mut batch = vec![first];
    let mut total_area = area;
    while batch.len() < MAX_MULTIDAB_MESSAGES {
        let Some(QueueEntry::Canvas(next)) = queue.front() else {
            break;
        };
        let next_area = message_dabs_area(next, total_area);
        if next_area > MAX_MULTIDAB_AREA {
            break;
        }
        total_area = next_area;
        match queue.pop_front() {
            Some(QueueEntry::Canvas(msg)) => batch.push(msg),
            _ => unreachable!("front was a canvas entry under the held lock"),
        }
    }

    if batch.len() == 1 {
        let single = batch.pop().expect("batch holds the first message");
        Some((local, Dispatch::Single(single)))
    } else {
        // One permit per extra shifted entry; the matching posts happened
        // before those entries became visible in the queue.
        sem.wait_n(batch.len() - 1);
        Some((local, Dispatch::Batch(batch)))
    }
}
