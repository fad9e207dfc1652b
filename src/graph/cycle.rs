#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Color {
    /// Not visited yet.
    White,
    /// On the current DFS path.
    Grey,
    /// Fully explored.
    Black,
}

/// Find a cycle in a graph of `len` nodes numbered `0..len`.
///
/// Iterative DFS with visiting/visited coloring. Returns the nodes of the
/// first cycle found, starting and ending with the same node.
pub(crate) fn find_cycle<I>(
    len: usize,
    mut successors: impl FnMut(usize) -> I,
) -> Option<Vec<usize>>
where
    I: IntoIterator<Item = usize>,
{
    let mut colors = vec![Color::White; len];
    let mut stack: Vec<(usize, I::IntoIter)> = Vec::new();
    for start in 0..len {
        if colors[start] != Color::White {
            continue;
        }
        colors[start] = Color::Grey;
        stack.push((start, successors(start).into_iter()));
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            match next.next() {
                Some(succ) => match colors[succ] {
                    Color::White => {
                        colors[succ] = Color::Grey;
                        stack.push((succ, successors(succ).into_iter()));
                    }
                    Color::Grey => {
                        let from = stack
                            .iter()
                            .position(|&(on_path, _)| on_path == succ)
                            .expect("find_cycle: [1]");
                        let mut cycle: Vec<_> = stack[from..].iter().map(|&(n, _)| n).collect();
                        cycle.push(succ);
                        return Some(cycle);
                    }
                    Color::Black => {}
                },
                None => {
                    colors[node] = Color::Black;
                    stack.pop();
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::find_cycle;

    fn adjacency(edges: &[(usize, usize)], len: usize) -> Vec<Vec<usize>> {
        let mut adj = vec![vec![]; len];
        for &(from, to) in edges {
            adj[from].push(to);
        }
        adj
    }

    #[test]
    fn diamond_is_acyclic() {
        let adj = adjacency(&[(0, 1), (0, 2), (1, 3), (2, 3)], 4);
        assert_eq!(find_cycle(4, |n| adj[n].iter().copied()), None);
    }

    #[test]
    fn reports_cycle_path() {
        let adj = adjacency(&[(0, 1), (1, 2), (2, 3), (3, 1)], 4);
        assert_eq!(
            find_cycle(4, |n| adj[n].iter().copied()),
            Some(vec![1, 2, 3, 1])
        );
    }

    #[test]
    fn self_loop() {
        let adj = adjacency(&[(0, 0)], 1);
        assert_eq!(find_cycle(1, |n| adj[n].iter().copied()), Some(vec![0, 0]));
    }
}
