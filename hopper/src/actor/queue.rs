use std::fmt;
use std::ptr::{self, NonNull};

use hopper_api::job::{Job, JobRef};
use hopper_api::priority::BUCKET_COUNT;

/// Jobs claimed from an actor's incoming list, ready to drain in priority order.
///
/// One intrusive FIFO bucket per priority class, linked through each job's
/// scheduler-private "next" word, plus a mask of nonempty buckets so that
/// `dequeue` and `is_empty` do not scan.
///
/// # Thread Safety
/// Not synchronized. The owning actor only touches it from the thread that
/// holds the actor's lock, which is why [`DefaultActor`](super::DefaultActor)
/// keeps it behind an `UnsafeCell`.
///
/// # Ownership
/// The queue owns the jobs linked into it. Dropping a nonempty queue drops
/// the jobs without running them.
pub struct PriorityQueue {
    heads: [*mut Job; BUCKET_COUNT],
    tails: [*mut Job; BUCKET_COUNT],
    nonempty: u32,
    len: usize,
}

// Jobs are `Send` and the raw links are only followed by the lock holder.
unsafe impl Send for PriorityQueue {}

impl PriorityQueue {
    pub fn new() -> Self {
        PriorityQueue {
            heads: [ptr::null_mut(); BUCKET_COUNT],
            tails: [ptr::null_mut(); BUCKET_COUNT],
            nonempty: 0,
            len: 0,
        }
    }

    /// Appends a job to the tail of its priority bucket.
    pub fn enqueue(&mut self, job: JobRef) {
        let bucket = job.priority().bucket_index();
        let raw = job.into_raw().as_ptr();
        // SAFETY: we now own `raw`; nothing else reads its link.
        unsafe { (*raw).set_next_link(ptr::null_mut()) };

        let tail = self.tails[bucket];
        if tail.is_null() {
            self.heads[bucket] = raw;
        } else {
            // SAFETY: `tail` is owned by this queue.
            unsafe { (*tail).set_next_link(raw) };
        }
        self.tails[bucket] = raw;
        self.nonempty |= 1 << bucket;
        self.len += 1;
    }

    /// Takes ownership of a FIFO-ordered chain and buckets every job in it.
    ///
    /// # Safety
    ///
    /// `head` must be null or the first of a chain of live, unowned job
    /// records linked through their next links and terminated by null.
    pub unsafe fn enqueue_contents_of(&mut self, head: *mut Job) {
        let mut current = head;
        while let Some(job) = NonNull::new(current) {
            // SAFETY: the chain is live and ours per the contract above.
            unsafe {
                current = job.as_ref().next_link();
                self.enqueue(JobRef::from_raw(job));
            }
        }
    }

    /// Removes the oldest job of the most urgent nonempty bucket.
    pub fn dequeue(&mut self) -> Option<JobRef> {
        if self.nonempty == 0 {
            return None;
        }
        let bucket = self.nonempty.trailing_zeros() as usize;
        let head = self.heads[bucket];
        // SAFETY: the mask says this bucket has a live head owned by us.
        let next = unsafe { (*head).next_link() };
        self.heads[bucket] = next;
        if next.is_null() {
            self.tails[bucket] = ptr::null_mut();
            self.nonempty &= !(1 << bucket);
        }
        self.len -= 1;
        // SAFETY: unlinked and owned by us.
        unsafe {
            (*head).set_next_link(ptr::null_mut());
            Some(JobRef::from_raw(NonNull::new_unchecked(head)))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nonempty == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PriorityQueue {
    fn drop(&mut self) {
        while let Some(job) = self.dequeue() {
            drop(job);
        }
    }
}

impl fmt::Debug for PriorityQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.len)
            .field("nonempty", &format_args!("{:#07b}", self.nonempty))
            .finish()
    }
}

/// Reverses a LIFO chain in place, returning the head of the FIFO chain.
///
/// # Safety
///
/// Same contract as [`PriorityQueue::enqueue_contents_of`].
pub(crate) unsafe fn reverse_chain(head: *mut Job) -> *mut Job {
    let mut reversed: *mut Job = ptr::null_mut();
    let mut current = head;
    while !current.is_null() {
        // SAFETY: live chain per contract.
        unsafe {
            let next = (*current).next_link();
            (*current).set_next_link(reversed);
            reversed = current;
            current = next;
        }
    }
    reversed
}
