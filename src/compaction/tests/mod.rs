mod tests_overlap;
