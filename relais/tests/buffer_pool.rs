use relais::buffer::{BufferPool, LARGE_BUFFER_SIZE, NORMAL_BUFFER_SIZE};

#[test]
fn test_get_buffer_has_normal_capacity() {
    let pool = BufferPool::new();
    let buffer = pool.get_buffer();
    assert_eq!(buffer.len(), NORMAL_BUFFER_SIZE);
}

#[test]
fn test_returned_buffer_is_reused() {
    let pool = BufferPool::new();

    let buffer = pool.get_buffer();
    let ptr = buffer.as_ptr();
    pool.put_buffer(buffer);

    let again = pool.get_buffer();
    assert_eq!(again.as_ptr(), ptr, "Pool should hand back the pooled buffer");
}

#[test]
fn test_grow_buffer_copies_contents() {
    let pool = BufferPool::new();

    let mut buffer = pool.get_buffer();
    let small_ptr = buffer.as_ptr();
    buffer[..5].copy_from_slice(b"hello");

    let large = pool.grow_buffer(buffer);
    assert_eq!(large.len(), LARGE_BUFFER_SIZE);
    assert_eq!(&large[..5], b"hello");

    // The small buffer went back to its free list.
    assert_eq!(pool.get_buffer().as_ptr(), small_ptr);

    pool.put_buffer(large);
}

#[test]
#[should_panic(expected = "does not belong to this pool")]
fn test_foreign_buffer_is_rejected() {
    let pool = BufferPool::new();
    pool.put_buffer(vec![0; 100]);
}
