/// Ring buffer whose contents can always be borrowed as one contiguous slice.
///
/// Every write lands twice, at `i` and `i + capacity`, so the newest `len` elements are
/// contiguous no matter where the write position is.
pub struct SliceableRingBuffer<T: Clone> {
    buffer: Vec<T>,
    write_position: usize,
    len: usize,
    capacity: usize,
    pending_capacity: Option<usize>,
    default_value: T,
}

impl<T: Clone> SliceableRingBuffer<T> {
    pub fn new(capacity: usize, default_value: T) -> Self {
        SliceableRingBuffer {
            buffer: vec![default_value.clone(); capacity * 2],
            write_position: 0,
            len: 0,
            capacity,
            pending_capacity: None,
            default_value,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Schedules a new capacity. Nothing is evicted until the next write.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity == self.capacity {
            self.pending_capacity = None;
        } else {
            self.pending_capacity = Some(capacity);
        }
    }

    pub fn write(&mut self, data: T) {
        if let Some(capacity) = self.pending_capacity.take() {
            self.resize(capacity);
        }
        if self.capacity == 0 {
            return;
        }

        let position = self.write_position;
        self.buffer[position] = data.clone();
        self.buffer[position + self.capacity] = data;

        self.write_position = (self.write_position + 1) % self.capacity;
        self.len = (self.len + 1).min(self.capacity);
    }

    pub fn extend_from_slice(&mut self, data: &[T]) {
        for item in data {
            self.write(item.clone());
        }
    }

    /// All retained elements, oldest first.
    pub fn get_slice(&self) -> &[T] {
        self.get_slice_with_len(self.len)
    }

    /// The newest `len` elements, oldest first.
    pub fn get_slice_with_len(&self, len: usize) -> &[T] {
        let len = len.min(self.len);
        if len == 0 {
            return &[];
        }
        let start = (self.write_position + self.capacity - len) % self.capacity;
        &self.buffer[start..start + len]
    }

    pub fn clear(&mut self) {
        if let Some(capacity) = self.pending_capacity.take() {
            self.capacity = capacity;
            self.buffer = vec![self.default_value.clone(); capacity * 2];
        }
        self.write_position = 0;
        self.len = 0;
    }

    fn resize(&mut self, capacity: usize) {
        let kept = self.get_slice_with_len(capacity).to_vec();
        self.buffer = vec![self.default_value.clone(); capacity * 2];
        self.capacity = capacity;
        self.write_position = 0;
        self.len = 0;
        for item in kept {
            self.write(item);
        }
    }
}
