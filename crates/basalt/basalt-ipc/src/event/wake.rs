//! Sleeping on a 32-bit word in shared memory.
//!
//! On Linux this is a process-shared futex. Elsewhere the sleeper polls the
//! word with short sleeps; notifications are never lost either way because the
//! sleeper returns as soon as the word differs from the value it last saw.

use std::io;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(target_os = "linux")]
mod imp {
    use super::*;
    use std::ptr;

    pub(super) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> io::Result<()> {
        let timespec = timeout.map(|t| libc::timespec {
            tv_sec: t.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: t.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = timespec
            .as_ref()
            .map_or(ptr::null(), |t| t as *const libc::timespec);

        // SAFETY: `word` is a valid, aligned u32 for the duration of the call;
        // FUTEX_WAIT without the private flag works across processes mapping
        // the same file.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT,
                expected,
                timespec_ptr,
            )
        };
        if ret == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::ETIMEDOUT) => Ok(()),
            _ => Err(err),
        }
    }

    pub(super) fn wake_all(word: &AtomicU32) {
        // SAFETY: see `wait`; waking has no preconditions beyond a valid address.
        unsafe {
            libc::syscall(libc::SYS_futex, word.as_ptr(), libc::FUTEX_WAKE, i32::MAX);
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    const POLL_INTERVAL: Duration = Duration::from_micros(200);

    pub(super) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> io::Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        while word.load(Ordering::Acquire) == expected {
            let mut nap = POLL_INTERVAL;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                nap = nap.min(deadline - now);
            }
            std::thread::sleep(nap);
        }
        Ok(())
    }

    pub(super) fn wake_all(_word: &AtomicU32) {}
}

/// Sleeps while `word` holds `expected`, at most `timeout`.
///
/// May return early and spuriously; callers re-check their condition.
/// `Interrupted` is reported when a signal arrived during the sleep.
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> io::Result<()> {
    imp::wait(word, expected, timeout)
}

/// Wakes every sleeper on `word`, in any process.
pub(crate) fn wake_all(word: &AtomicU32) {
    imp::wake_all(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    #[test]
    fn returns_immediately_when_the_word_changed() {
        let word = AtomicU32::new(3);
        let start = Instant::now();
        wait(&word, 2, Some(Duration::from_secs(5))).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn times_out_on_an_unchanged_word() {
        let word = AtomicU32::new(0);
        let start = Instant::now();
        let timeout = Duration::from_millis(30);
        while start.elapsed() < timeout {
            wait(&word, 0, Some(timeout - start.elapsed())).unwrap();
        }
        assert!(start.elapsed() >= timeout);
    }

    #[test]
    fn wake_reaches_a_sleeping_thread() {
        let word = Arc::new(AtomicU32::new(0));
        let sleeper = {
            let word = word.clone();
            std::thread::spawn(move || {
                while word.load(Ordering::Acquire) == 0 {
                    wait(&word, 0, None).unwrap();
                }
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        word.fetch_add(1, Ordering::Release);
        wake_all(&word);
        sleeper.join().unwrap();
    }
}
