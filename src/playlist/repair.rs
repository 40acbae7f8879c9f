use crate::models::Song;

/// Delete every later occurrence of a run of two or more songs that already
/// appears earlier in the list in the same order. Returns whether anything
/// was deleted.
pub fn remove_repeated_runs(playlist: &mut Vec<Song>) -> bool {
    let mut deleted = false;
    while let Some((start, len)) = find_repeated_run(playlist) {
        playlist.drain(start..start + len);
        deleted = true;
    }
    deleted
}

/// Position and length of the first repeated run, if any
fn find_repeated_run(list: &[Song]) -> Option<(usize, usize)> {
    for first in 0..list.len() {
        for second in first + 1..list.len() {
            let mut len = 0;
            // The repeat may not overlap the original run
            while second + len < list.len()
                && first + len < second
                && list[first + len] == list[second + len]
            {
                len += 1;
            }
            if len >= 2 {
                return Some((second, len));
            }
        }
    }
    None
}
