/// Dense (above x below x state) table.
/// Cells are laid out as [above][below][state], so all the states of a coordinate are contiguous.
#[derive(Debug, Clone)]
pub struct DPTable<T> {
    // Number of below positions, i.e., below length + 1.
    column: usize,
    states: usize,
    data: Vec<T>,
}

impl<T: Copy> DPTable<T> {
    pub fn new(row: usize, column: usize, states: usize, default: T) -> Self {
        Self {
            column,
            states,
            data: vec![default; row * column * states],
        }
    }
    fn position(&self, i: usize, j: usize, s: usize) -> usize {
        (i * self.column + j) * self.states + s
    }
    pub fn get(&self, i: usize, j: usize, s: usize) -> T {
        self.data[self.position(i, j, s)]
    }
    pub fn set(&mut self, i: usize, j: usize, s: usize, target: T) {
        let index = self.position(i, j, s);
        self.data[index] = target;
    }
    pub fn get_mut(&mut self, i: usize, j: usize, s: usize) -> &mut T {
        let index = self.position(i, j, s);
        &mut self.data[index]
    }
    // Return the cells at (i,j). The length is `states`.
    pub fn get_cells(&self, i: usize, j: usize) -> &[T] {
        let start = self.position(i, j, 0);
        &self.data[start..start + self.states]
    }
}

impl<T: Copy> std::ops::Index<(usize, usize, usize)> for DPTable<T> {
    type Output = T;
    fn index(&self, (i, j, s): (usize, usize, usize)) -> &Self::Output {
        &self.data[self.position(i, j, s)]
    }
}

impl<T: Copy> std::ops::IndexMut<(usize, usize, usize)> for DPTable<T> {
    fn index_mut(&mut self, (i, j, s): (usize, usize, usize)) -> &mut Self::Output {
        self.get_mut(i, j, s)
    }
}
